//! HTTP 中间件
//! 应用状态、请求追踪、登录限流、客户端信息提取

use crate::{
    auth::{JwtService, PasswordHasher},
    config::AppConfig,
    error::AppError,
    models::session::ClientInfo,
    repository::{AccountStore, RefreshLedger},
    services::AuthService,
};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth_service: Arc<AuthService>,
    pub jwt_service: Arc<JwtService>,
    /// 就绪探针使用
    pub accounts: Arc<dyn AccountStore>,
    /// 登录接口 IP 限流器
    pub login_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    /// 按配置组装服务，存储后端由调用方选择
    pub fn new(
        config: AppConfig,
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn RefreshLedger>,
    ) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let jwt_service = Arc::new(JwtService::from_config(&config)?);
        let hasher = Arc::new(PasswordHasher::from_config(&config.security)?);

        let auth_service = Arc::new(AuthService::new(
            accounts.clone(),
            ledger,
            jwt_service.clone(),
            hasher,
            config.clone(),
        ));

        let login_limiter = Arc::new(IpRateLimiter::new(
            config.security.login_max_requests,
            config.security.login_window_secs,
        ));

        Ok(Self {
            config,
            auth_service,
            jwt_service,
            accounts,
            login_limiter,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    // 只记录路径，避免查询参数进入日志
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400 => "400",
            401 => "401",
            403 => "403",
            404 => "404",
            429 => "429",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 获取客户端 IP 地址
/// 信任代理时优先使用代理头，其次是连接地址，都没有时返回回环地址（测试环境）
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        // X-Forwarded-For 可能包含多个 IP，取第一个
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return ip;
        }
    }

    match peer {
        Some(addr) => addr.ip(),
        None => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

// ==================== 客户端信息提取器 ====================

/// Axum 提取器：客户端 IP 与 User-Agent，写入刷新令牌账本
pub struct ClientMeta {
    pub ip: IpAddr,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn to_client_info(&self) -> ClientInfo {
        ClientInfo {
            ip_address: Some(self.ip.to_string()),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for ClientMeta {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let ip = client_ip(&parts.headers, peer, state.config.security.trust_proxy);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(512).collect());

        Ok(ClientMeta { ip, user_agent })
    }
}

// ==================== 限流服务 ====================

/// IP 级别的速率限制器
/// 使用滑动窗口算法实现
pub struct IpRateLimiter {
    /// 每个 IP 地址的请求时间戳
    windows: DashMap<IpAddr, Arc<Mutex<VecDeque<Instant>>>>,
    max_requests: usize,
    window: Duration,
    /// 跟踪的 IP 数量上限
    max_tracked: usize,
}

const DEFAULT_MAX_TRACKED_IPS: usize = 10_000;

impl IpRateLimiter {
    pub fn new(max_requests: u32, window_secs: u32) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests: max_requests as usize,
            window: Duration::from_secs(window_secs as u64),
            max_tracked: DEFAULT_MAX_TRACKED_IPS,
        }
    }

    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    /// 检查是否允许请求，允许时记录本次请求
    pub fn check(&self, ip: &IpAddr) -> bool {
        if !self.windows.contains_key(ip) && self.windows.len() >= self.max_tracked {
            self.evict_idle();
        }

        let window = self
            .windows
            .entry(*ip)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone();

        let mut requests = match window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        // 清理过期的请求记录
        while let Some(&front) = requests.front() {
            if now.duration_since(front) < self.window {
                break;
            }
            requests.pop_front();
        }

        if requests.len() < self.max_requests {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// 检查并在超限时返回 429
    pub fn enforce(&self, ip: &IpAddr) -> Result<(), AppError> {
        if self.check(ip) {
            Ok(())
        } else {
            tracing::warn!(client_ip = %ip, "Login rate limit exceeded");
            metrics::counter!("auth_login_rate_limited_total").increment(1);
            Err(AppError::RateLimitExceeded)
        }
    }

    pub fn tracked_ips(&self) -> usize {
        self.windows.len()
    }

    /// 移除窗口内已无请求的 IP；仍超出上限时按插入顺序丢弃一半
    fn evict_idle(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| {
            let requests = match window.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let active = requests
                .back()
                .is_some_and(|&last| now.duration_since(last) < self.window);
            active
        });

        if self.windows.len() >= self.max_tracked {
            let keys: Vec<IpAddr> = self
                .windows
                .iter()
                .take(self.max_tracked / 2 + 1)
                .map(|entry| *entry.key())
                .collect();
            for key in keys {
                self.windows.remove(&key);
            }
        }

        tracing::debug!(tracked_ips = self.windows.len(), "Evicted login rate limit windows");
    }
}
