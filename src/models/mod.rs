//! 数据模型模块
//! 账户、认证请求与刷新令牌账本模型

pub mod account;
pub mod auth;
pub mod session;
