use clap::Parser;

/// Command line arguments for the gateway CLI.
///
/// Only `--config` is a startup-only CLI option; everything else the
/// service needs to know lives in the TOML config file it points at.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct GatewayArgs {
  /// Path to the TOML configuration file.
  #[arg(long, env = "GATEWAY_CONFIG", default_value = "gateway.toml")]
  pub config: std::path::PathBuf,

  /// Address to bind the HTTP server to.
  #[arg(long, env = "GATEWAY_ADDRESS", default_value = "0.0.0.0:8080")]
  pub address: String,
}
