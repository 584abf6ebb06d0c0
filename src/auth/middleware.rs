//! JWT 认证中间件（会话校验）

use crate::{
    auth::jwt::JwtService,
    error::AppError,
    models::account::Role,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            let (scheme, token) = s.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
}

/// 校验请求：
/// 无令牌 → 401；令牌过期 → 401（需要刷新）；签名错误或格式错误 → 403
pub fn verify_request(jwt_service: &JwtService, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let token = extract_token(headers).ok_or(AppError::Unauthorized)?;

    let claims = jwt_service.verify_access(token)?;
    let account_id = claims.account_id()?;

    Ok(AuthContext {
        account_id,
        email: claims.email,
        role: claims.role,
    })
}

/// 角色检查（身份校验之后的第二道门）
pub fn ensure_role(context: &AuthContext, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&context.role) {
        Ok(())
    } else {
        tracing::debug!(
            account_id = %context.account_id,
            role = %context.role,
            "Role not permitted"
        );
        Err(AppError::Forbidden)
    }
}

/// JWT 认证中间件 - 必须认证
pub async fn jwt_auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_context = verify_request(&jwt_service, req.headers())?;

    // 附加到请求扩展
    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}

/// 角色中间件，必须放在 jwt_auth_middleware 之后
pub async fn require_roles(
    State(allowed): State<&'static [Role]>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(AppError::Unauthorized)?;

    ensure_role(context, allowed)?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::{Account, AccountStatus, HashScheme};
    use chrono::{Duration, Utc};

    fn jwt() -> JwtService {
        JwtService::from_config(&crate::test_support::test_config()).unwrap()
    }

    fn account(role: Role) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            secret_hash: String::new(),
            hash_scheme: HashScheme::Argon2id,
            role,
            status: AccountStatus::Active,
            full_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_token_valid() {
        let headers = bearer("test_token_123");
        assert_eq!(extract_token(&headers), Some("test_token_123"));
    }

    #[test]
    fn test_extract_token_missing_or_other_scheme() {
        assert_eq!(extract_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(extract_token(&headers), None);

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_no_token_is_unauthorized() {
        let err = verify_request(&jwt(), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn test_valid_token_attaches_identity() {
        let jwt = jwt();
        let account = account(Role::Doctor);
        let pair = jwt.issue(&account).unwrap();

        let context = verify_request(&jwt, &bearer(&pair.access_token)).unwrap();
        assert_eq!(context.account_id, account.id);
        assert_eq!(context.role, Role::Doctor);
    }

    #[test]
    fn test_expired_token_requires_refresh() {
        let jwt = jwt();
        let issued_at = Utc::now() - Duration::seconds(jwt.access_token_exp_secs() as i64 + 5);
        let pair = jwt.issue_at(&account(Role::User), issued_at).unwrap();

        let err = verify_request(&jwt, &bearer(&pair.access_token)).unwrap_err();
        assert!(matches!(err, AppError::TokenExpired));
    }

    #[test]
    fn test_malformed_or_refresh_token_is_invalid() {
        let jwt = jwt();
        let err = verify_request(&jwt, &bearer("not.a.jwt")).unwrap_err();
        assert!(matches!(err, AppError::TokenInvalid));

        let pair = jwt.issue(&account(Role::User)).unwrap();
        let err = verify_request(&jwt, &bearer(&pair.refresh_token)).unwrap_err();
        assert!(matches!(err, AppError::TokenInvalid));
    }

    #[test]
    fn test_role_gate() {
        let context = AuthContext {
            account_id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            role: Role::Lab,
        };
        assert!(ensure_role(&context, &[Role::Lab, Role::Doctor]).is_ok());
        assert!(matches!(
            ensure_role(&context, &[Role::Admin]).unwrap_err(),
            AppError::Forbidden
        ));
    }
}
