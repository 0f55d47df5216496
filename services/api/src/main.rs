use lifecycle::{load_config_from_file, BetEngine, EngineConfig, SystemClock};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use verification::{
    HttpSuggestions, HttpVerifier, StubSuggestions, StubVerifier, SuggestionBackend,
    VerificationBackend,
};

mod error;
mod routes;

use routes::{app, AppState};

fn init_backends() -> (Arc<dyn VerificationBackend>, Arc<dyn SuggestionBackend>) {
    match env::var("VERIFIER_URL") {
        Ok(url) => {
            let url = url.trim_end_matches('/').to_string();
            info!("using remote verifier at {}", url);
            (
                Arc::new(HttpVerifier::new(format!("{url}/verify"))),
                Arc::new(HttpSuggestions::new(format!("{url}/suggestions"))),
            )
        }
        Err(_) => {
            let latency_ms = env::var("STUB_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1_500);
            info!("VERIFIER_URL not set; using stub verifier ({}ms)", latency_ms);
            (
                Arc::new(StubVerifier::new(Duration::from_millis(latency_ms))),
                Arc::new(StubSuggestions::new()),
            )
        }
    }
}

fn spawn_deadline_sweeper(engine: Arc<BetEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(engine.config().sweep_interval_ms));
        loop {
            interval.tick().await;
            match engine.sweep_deadlines(engine.now()).await {
                Ok(report) if !report.expired.is_empty() || report.failures > 0 => {
                    info!(
                        "sweep examined {} bet(s), expired {}, failures {}",
                        report.examined,
                        report.expired.len(),
                        report.failures
                    );
                }
                Ok(report) => debug!("sweep examined {} bet(s)", report.examined),
                Err(err) => warn!("deadline sweep failed: {err}"),
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match env::var("PLEDGE_CONFIG") {
        Ok(path) => {
            info!("loading engine config from {}", path);
            load_config_from_file(path)?
        }
        Err(_) => EngineConfig::default(),
    };

    let (verifier, suggestions) = init_backends();
    let engine = Arc::new(BetEngine::in_memory(
        config,
        verifier,
        Arc::new(SystemClock),
    ));
    let sweeper = spawn_deadline_sweeper(engine.clone());

    let app = app(AppState::new(engine, suggestions));
    let addr: SocketAddr = env::var("PLEDGE_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;
    info!("pledge api listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app.into_make_service());

    tokio::select! {
        _ = sweeper => {}
        res = server => {
            if let Err(err) = res {
                warn!("server error: {err}");
            }
        }
    }
    Ok(())
}
