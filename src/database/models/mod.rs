// 数据库实体定义

pub mod permission;
pub mod role;
pub mod user;
