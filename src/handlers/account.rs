//! 账户管理 HTTP 处理器

use crate::{
    auth::{cookie::clear_refresh_cookie, middleware::AuthContext},
    error::AppError,
    middleware::AppState,
    models::{
        account::{AccountResponse, ChangeSecretRequest, UpdateStatusRequest},
        auth::LogoutAllResponse,
        session::SweepResponse,
    },
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// 修改自己的密码，所有设备上的会话随之失效
pub async fn change_secret(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    payload: Result<Json<ChangeSecretRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let revoked = state
        .auth_service
        .change_secret(auth_context.account_id, &req.current_secret, &req.new_secret)
        .await?;

    Ok((
        [(
            header::SET_COOKIE,
            clear_refresh_cookie(state.config.security.cookie_secure),
        )],
        Json(LogoutAllResponse { revoked }),
    ))
}

/// 审核、拒绝或停用账户（管理员）
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<AccountResponse>, AppError> {
    let Json(req) = payload?;
    if id == auth_context.account_id && !req.status.is_active() {
        return Err(AppError::BadRequest(
            "Cannot deactivate your own account".to_string(),
        ));
    }

    let account = state.auth_service.set_status(id, req.status).await?;
    tracing::info!(
        admin_id = %auth_context.account_id,
        account_id = %id,
        status = %req.status,
        "Account status updated by admin"
    );

    Ok(Json(account.into()))
}

/// 删除账户（管理员）
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if id == auth_context.account_id {
        return Err(AppError::BadRequest("Cannot delete your own account".to_string()));
    }

    state.auth_service.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 手动清理过期刷新令牌（管理员）
pub async fn sweep_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, AppError> {
    let removed = state.auth_service.sweep_expired().await?;
    Ok(Json(SweepResponse { removed }))
}
