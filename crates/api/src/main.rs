//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat, PayCredentials};
use api::AppState;
use broadcast::{Broadcaster, SessionRegistry};
use domain::OrderLifecycle;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use payment::{InMemoryPaymentGateway, NotifyCipher, PaymentGateway, WechatPayClient};
use reconciliation::TimeoutSweeper;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match &config.pay {
        Some(credentials) => Arc::new(wechat_client(config, credentials).await),
        None => {
            tracing::warn!("payment credentials incomplete, using the in-memory gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

async fn wechat_client(config: &Config, credentials: &PayCredentials) -> WechatPayClient {
    let pem = tokio::fs::read_to_string(&credentials.private_key_path)
        .await
        .expect("failed to read merchant private key");
    WechatPayClient::new(credentials.client_config(pem, &config.pay_base_url, config.pay_timeout))
        .expect("failed to build payment gateway client")
}

async fn serve<S: OrderStore + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    let gateway = build_gateway(&config).await;
    let cipher = config
        .pay_api_v3_key
        .as_deref()
        .map(|key| NotifyCipher::new(key).expect("PAY_API_V3_KEY must be 32 bytes"));
    if cipher.is_none() {
        tracing::warn!("PAY_API_V3_KEY not set, payment callbacks will be refused");
    }

    // Live push
    let sessions = Arc::new(SessionRegistry::new());
    let (broadcaster, _dispatcher) = Broadcaster::spawn(sessions.clone());

    let lifecycle =
        Arc::new(OrderLifecycle::new(store, gateway).with_observer(Arc::new(broadcaster)));
    let state = Arc::new(AppState::new(lifecycle.clone(), cipher, sessions));

    // Background sweeps
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Arc::new(TimeoutSweeper::new(lifecycle, config.sweeper));
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        tracing::error!(error = %e, "sweeper task failed");
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and run
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresOrderStore::connect(&url, 10)
                .await
                .expect("failed to connect to database");
            tracing::info!("using PostgreSQL order store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            serve(config, InMemoryOrderStore::new(), metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
