#![allow(clippy::needless_return)]

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::net::SocketAddr;

use clap::Parser;
use gateway_cli::GatewayArgs;
use gatewaycore::{AppState, Config};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();
}

async fn load_config(path: &std::path::Path) -> Result<Config, BoxError> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
  let config: Config = toml::from_str(&raw).map_err(|e| format!("failed to parse config file '{}': {e}", path.display()))?;
  return Ok(config);
}

async fn async_main() -> Result<(), BoxError> {
  init_logging();

  let args = GatewayArgs::parse();

  let config = match load_config(&args.config).await {
    Ok(config) => config,
    Err(err) => {
      tracing::error!(error = %err, "failed to load configuration");
      return Err(err);
    }
  };

  let state = match AppState::build(config).await {
    Ok(state) => state,
    Err(err) => {
      tracing::error!(error = %err, "failed to initialize gateway state");
      return Err(Box::new(err));
    }
  };

  let addr: SocketAddr = args
    .address
    .parse()
    .map_err(|e| format!("invalid --address '{}': {e}", args.address))?;

  let router = gatewaycore::build_router(state);

  let listener = tokio::net::TcpListener::bind(addr).await?;
  tracing::info!(address = %addr, "gateway listening");

  axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;

  return Ok(());
}

fn main() -> Result<(), BoxError> {
  let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
  return runtime.block_on(async_main());
}
