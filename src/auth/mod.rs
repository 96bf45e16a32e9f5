//! 认证与授权核心
//!
//! - `service`: 登录、注册、令牌刷新、密码修改与重置
//! - `resolver`: 从角色集合计算有效权限，以及权限树的展示辅助
//! - `guard`: 按路由声明的 `Requirements` 做出 Allow / Deny 判定
//! - `captcha`: 登录与注册前置的验证码会话

pub mod captcha;
pub mod guard;
pub mod identity;
pub mod resolver;
pub mod service;

pub use captcha::{CaptchaChallenge, CaptchaService, CaptchaStore, CaptchaVerdict, MemoryCaptchaStore};
pub use guard::{Decision, DenyReason, OwnerPolicy, Requirements, ResourceTarget, authorize};
pub use identity::{Identity, UserView};
pub use service::AuthService;

/// 保留角色名，持有者可绕过声明了 super_admin 的路由上的其余检查
pub const SUPER_ADMIN_ROLE: &str = "super_admin";

/// 持有该角色的用户不能通过管理接口修改角色、状态或被删除
pub const ADMIN_ROLE: &str = "admin";
