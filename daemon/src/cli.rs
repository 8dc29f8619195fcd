//! Daemon CLI, grounded on
//! `examples/firezone-firezone/rust/headless-client/src/main.rs`'s `Cli`
//! derive shape: long flags with `env` fallbacks so the same binary reads
//! equally well from a systemd unit's `Environment=` block or a shell.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "rvpn-daemon", version, about = "rVPN per-host daemon")]
pub struct Cli {
    /// Directory the daemon writes its log file into, in addition to stdout.
    #[arg(long, env = "RVPN_LOG_DIR")]
    pub log_dir: Option<String>,

    /// Default tracing filter directive used when `RUST_LOG` is unset.
    #[arg(long, env = "RVPN_LOG_FILTER", default_value = "rvpn_daemon=info,warn")]
    pub log_filter: String,
}
