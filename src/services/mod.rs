// 角色、权限与用户的管理操作
// 所有存储调用都带超时

pub mod permission;
pub mod role;
pub mod user;

pub use permission::PermissionService;
pub use role::RoleService;
pub use user::UserService;
