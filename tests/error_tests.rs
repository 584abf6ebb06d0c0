//! 错误处理测试
//!
//! 状态码映射与错误响应格式

use axum::{http::StatusCode, response::IntoResponse};
use hms_auth::error::{AppError, REFRESH_REQUIRED_HEADER};
use http_body_util::BodyExt;

async fn render(error: AppError) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    let response = error.into_response();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_session_error_status_codes() {
    assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(AppError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        AppError::ReauthenticationRequired.status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(AppError::TokenInvalid.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(
        AppError::AccountInactive("pending".to_string()).status_code(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(AppError::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_error_response_structure() {
    let (status, headers, json) = render(AppError::InvalidCredentials).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(REFRESH_REQUIRED_HEADER).is_none());
    assert_eq!(json["error"]["code"], 400);
    assert_eq!(json["error"]["kind"], "invalid_credentials");
    assert_eq!(json["error"]["message"], "Invalid email or password");
    assert!(json["error"]["requestId"].is_string());
}

#[tokio::test]
async fn test_expired_token_sets_refresh_header() {
    let (status, headers, json) = render(AppError::TokenExpired).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get(REFRESH_REQUIRED_HEADER).unwrap(), "true");
    assert_eq!(json["error"]["kind"], "token_expired");

    // 其他 401 不提示刷新
    let (_, headers, _) = render(AppError::ReauthenticationRequired).await;
    assert!(headers.get(REFRESH_REQUIRED_HEADER).is_none());
}

#[tokio::test]
async fn test_storage_errors_are_not_exposed() {
    let (status, _, json) = render(AppError::Database(sqlx::Error::RowNotFound)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["kind"], "internal");
    let message = json["error"]["message"].as_str().unwrap().to_lowercase();
    assert!(!message.contains("row"));
    assert!(!message.contains("sqlx"));

    let (_, _, json) = render(AppError::Config("jwt secret is hunter2".to_string())).await;
    assert!(!json["error"]["message"].as_str().unwrap().contains("hunter2"));
}

#[test]
fn test_from_config_error() {
    let error: AppError = config::ConfigError::Message("bad".to_string()).into();
    assert!(matches!(error, AppError::Config(_)));
    assert_eq!(error.code(), 500);
}
