//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::{
    auth::middleware::{jwt_auth_middleware, require_roles},
    handlers,
    middleware::{request_tracking_middleware, AppState},
    models::account::Role,
};

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 刷新与登出只依赖 Cookie，不要求访问令牌
    let auth_routes = Router::new()
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/api/v1/auth/logout", post(handlers::auth::logout));

    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/accounts/{id}",
            delete(handlers::account::delete_account),
        )
        .route(
            "/api/v1/admin/accounts/{id}/status",
            put(handlers::account::update_status),
        )
        .route(
            "/api/v1/admin/sessions/sweep",
            post(handlers::account::sweep_sessions),
        )
        .route_layer(from_fn_with_state(ADMIN_ONLY, require_roles));

    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::me))
        .route("/api/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/api/v1/accounts/me/secret", put(handlers::account::change_secret))
        .merge(admin_routes)
        // route_layer 只作用于已匹配的路由，未知路径仍返回 404
        .route_layer(from_fn_with_state(
            state.jwt_service.clone(),
            jwt_auth_middleware,
        ));

    let router = Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .layer(from_fn(request_tracking_middleware));

    let router = match cors_layer(state.config.server.cors_origins.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// 控制台跨域访问，刷新令牌 Cookie 需要 allow_credentials
fn cors_layer(origins: Option<&[String]>) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins?
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .expose_headers([header::HeaderName::from_static("x-refresh-required")])
            .allow_credentials(true),
    )
}
