//! 认证服务主入口

use hms_auth::{
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::{
        AccountStore, MemoryAccountStore, MemoryRefreshLedger, PgAccountStore, PgRefreshLedger,
        RefreshLedger,
    },
    routes, telemetry,
};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("hms-auth {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量
    if let Ok(env) = std::env::var("HMS_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    // 3. 存储后端
    let (accounts, ledger): (Arc<dyn AccountStore>, Arc<dyn RefreshLedger>) =
        if config.database.is_memory() {
            tracing::warn!("Using in-memory storage, all data is lost on restart");
            (
                Arc::new(MemoryAccountStore::new()),
                Arc::new(MemoryRefreshLedger::new()),
            )
        } else {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database initialized");
            (
                Arc::new(PgAccountStore::new(pool.clone())),
                Arc::new(PgRefreshLedger::new(pool)),
            )
        };

    // 4. 构建应用状态
    let bootstrap_admin = config
        .security
        .bootstrap_admin_email
        .clone()
        .zip(config.security.bootstrap_admin_secret.clone());
    let shutdown_timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    let addr = config.server.addr.clone();

    let app_state = Arc::new(AppState::new(config, accounts, ledger)?);

    if let Some((email, secret)) = bootstrap_admin {
        app_state
            .auth_service
            .seed_admin(&email, secret.expose_secret())
            .await?;
    }

    // 启动时清理一次过期刷新令牌
    if let Err(e) = app_state.auth_service.sweep_expired().await {
        tracing::warn!(error = %e, "Startup sweep of expired refresh tokens failed");
    }

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    // 7. 优雅关闭，超时后强制退出
    tokio::select! {
        result = async { server.await } => result?,
        _ = async {
            let _ = shutdown_rx.await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("hms-auth {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: hms-auth [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 HMS_ 前缀的环境变量完成，例如 HMS_SECURITY__JWT_SECRET");
    println!("  HMS_ENV=<name> 时加载 .env.<name>");
}
