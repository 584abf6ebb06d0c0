//! 测试公共模块
//! 提供测试配置、内存存储的应用状态和请求辅助函数

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use hms_auth::{
    auth::{password::legacy_sha256_digest, PasswordHasher},
    config::{AppConfig, DatabaseConfig, LoggingConfig, SecurityConfig, ServerConfig},
    middleware::AppState,
    models::account::{Account, AccountStatus, HashScheme, NewAccount, Role},
    repository::{AccountStore, MemoryAccountStore, MemoryRefreshLedger},
    routes,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "TestPass123";

/// 创建测试配置（内存后端）
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_secs: 5,
            cors_origins: None,
        },
        database: DatabaseConfig {
            backend: "memory".to_string(),
            url: Secret::new(
                std::env::var("TEST_DATABASE_URL").unwrap_or_default(),
            ),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            jwt_secret: Secret::new("test-secret-key-for-testing-only-min-32-chars".to_string()),
            access_token_exp_secs: 300,
            refresh_token_exp_secs: 3600,
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_digit: true,
            password_require_special: false,
            // 测试用低开销参数
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            cookie_secure: false,
            refresh_reuse_detection: true,
            login_max_requests: 1000,
            login_window_secs: 60,
            trust_proxy: false,
            bootstrap_admin_email: None,
            bootstrap_admin_secret: None,
        },
    }
}

/// 内存存储的测试应用
pub struct TestApp {
    pub state: Arc<AppState>,
    pub accounts: Arc<MemoryAccountStore>,
    pub ledger: Arc<MemoryRefreshLedger>,
    pub hasher: PasswordHasher,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let accounts = Arc::new(MemoryAccountStore::new());
        let ledger = Arc::new(MemoryRefreshLedger::new());
        let hasher =
            PasswordHasher::from_config(&config.security).expect("Failed to create hasher");
        let state = Arc::new(
            AppState::new(config, accounts.clone(), ledger.clone())
                .expect("Failed to create app state"),
        );

        Self {
            state,
            accounts,
            ledger,
            hasher,
        }
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// 直接写入存储的测试账户（Argon2id）
    pub async fn create_account(&self, email: &str, role: Role, status: AccountStatus) -> Account {
        self.create_account_with_secret(email, TEST_SECRET, role, status)
            .await
    }

    pub async fn create_account_with_secret(
        &self,
        email: &str,
        secret: &str,
        role: Role,
        status: AccountStatus,
    ) -> Account {
        let (secret_hash, hash_scheme) = self
            .hasher
            .hash_and_store(secret)
            .expect("Failed to hash secret");

        self.insert(email, secret_hash, hash_scheme, role, status).await
    }

    /// 旧系统导入的账户（加盐 SHA-256）
    pub async fn create_legacy_account(&self, email: &str, secret: &str) -> Account {
        let secret_hash = legacy_sha256_digest(b"legacy-salt-0001", secret);
        self.insert(
            email,
            secret_hash,
            HashScheme::LegacySha256,
            Role::User,
            AccountStatus::Active,
        )
        .await
    }

    async fn insert(
        &self,
        email: &str,
        secret_hash: String,
        hash_scheme: HashScheme,
        role: Role,
        status: AccountStatus,
    ) -> Account {
        self.accounts
            .insert(NewAccount {
                email: email.to_string(),
                secret_hash,
                hash_scheme,
                role,
                status,
                full_name: None,
            })
            .await
            .expect("Failed to create test account")
    }

    /// 登录并返回 (访问令牌, 刷新令牌)
    pub async fn login(&self, email: &str, secret: &str) -> (String, String) {
        let response = self
            .send(post_json(
                "/api/v1/auth/login",
                serde_json::json!({ "email": email, "secret": secret }),
            ))
            .await;
        assert_eq!(response.status(), 200, "login should succeed");

        let cookie = refresh_cookie_value(&response).expect("login should set refresh cookie");
        let json = body_json(response).await;
        let access = json["accessToken"]
            .as_str()
            .expect("accessToken should be a string")
            .to_string();
        (access, cookie)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.expect("request failed")
    }
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn json_with_bearer(
    method: &str,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_refresh_cookie(uri: &str, refresh_token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, format!("refreshToken={}", refresh_token))
        .body(Body::empty())
        .unwrap()
}

/// 从 Set-Cookie 中读取刷新令牌（清除 Cookie 时返回 None）
pub fn refresh_cookie_value(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.strip_prefix("refreshToken="))
        .find(|value| !value.is_empty())
        .map(|value| value.to_string())
}

pub fn set_cookie_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
