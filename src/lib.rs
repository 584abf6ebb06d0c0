//! 医院管理系统认证服务
//! 会话、令牌签发与轮换

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;

#[cfg(test)]
mod test_support;
