//! 认证相关的 HTTP 处理器

use crate::{
    auth::{
        cookie::{clear_refresh_cookie, read_refresh_cookie, refresh_cookie},
        middleware::AuthContext,
    },
    error::AppError,
    middleware::{AppState, ClientMeta},
    models::{
        account::{AccountResponse, RegisterRequest},
        auth::{AccessTokenResponse, LoginRequest, LogoutAllResponse, MeResponse},
    },
    services::auth_service::SessionGrant,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 访问令牌放在响应体，刷新令牌放在 HttpOnly Cookie
fn session_response(state: &AppState, grant: SessionGrant) -> Result<Response, AppError> {
    let cookie = refresh_cookie(
        &grant.tokens.refresh_token,
        state.jwt_service.refresh_token_exp_secs(),
        state.config.security.cookie_secure,
    )
    .ok_or_else(|| AppError::internal_error("Refresh token is not a valid cookie value"))?;

    let body = AccessTokenResponse {
        access_token: grant.tokens.access_token,
        role: grant.account.role,
        expires_in: grant.tokens.expires_in,
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// 注册
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let account = state.auth_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    state.login_limiter.enforce(&client.ip)?;
    let Json(req) = payload?;

    let grant = state
        .auth_service
        .login(&req.email, &req.secret, &client.to_client_info())
        .await?;

    session_response(&state, grant)
}

/// 刷新令牌（轮换）
/// 失败时同时清除浏览器中的 Cookie，前端需要重新登录
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    headers: HeaderMap,
) -> Response {
    let secure = state.config.security.cookie_secure;

    let result = match read_refresh_cookie(&headers) {
        Some(token) => state
            .auth_service
            .refresh(&token, &client.to_client_info())
            .await
            .and_then(|grant| session_response(&state, grant)),
        None => Err(AppError::ReauthenticationRequired),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            let mut response = e.into_response();
            response
                .headers_mut()
                .append(header::SET_COOKIE, clear_refresh_cookie(secure));
            response
        }
    }
}

/// 登出，令牌缺失或未知时同样返回成功
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = read_refresh_cookie(&headers);
    state.auth_service.logout(token.as_deref()).await?;

    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            clear_refresh_cookie(state.config.security.cookie_secure),
        )],
        Json(json!({})),
    ))
}

/// 从所有设备登出
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.auth_service.logout_all(auth_context.account_id).await?;

    Ok((
        [(
            header::SET_COOKIE,
            clear_refresh_cookie(state.config.security.cookie_secure),
        )],
        Json(LogoutAllResponse { revoked }),
    ))
}

/// 获取当前身份
pub async fn me(auth_context: AuthContext) -> Json<MeResponse> {
    Json(MeResponse {
        account_id: auth_context.account_id,
        email: auth_context.email,
        role: auth_context.role,
    })
}
