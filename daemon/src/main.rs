mod actor;
mod cli;
mod error;
mod local_state;
mod rpc_server;
mod session;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let _log_handle = rvpn_logging::init(&cli.log_filter)?;

    let actor = actor::spawn();
    rpc_server::serve(actor).await?;
    Ok(())
}
