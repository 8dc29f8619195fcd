//! Control-plane CLI, grounded on
//! `examples/firezone-firezone/rust/headless-client/src/main.rs`'s `Cli`
//! derive shape.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "rvpn-control-plane", version, about = "rVPN control plane")]
pub struct Cli {
    #[arg(long, env = "RVPN_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: std::net::SocketAddr,

    #[arg(long, env = "RVPN_DATABASE_URL")]
    pub database_url: String,

    /// Secret used to sign and validate HS256 bearer tokens. Never exposed
    /// on the command line in practice; always read from the environment.
    #[arg(long, env = "RVPN_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "RVPN_LOG_FILTER", default_value = "rvpn_control_plane=info,warn")]
    pub log_filter: String,
}
