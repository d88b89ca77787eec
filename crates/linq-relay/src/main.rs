#![forbid(unsafe_code)]

//! linq relay - broadcasts signaling traffic between connected peers.

use anyhow::Result;
use clap::Parser;
use linq_common::config::{
    DEFAULT_SIGNALING_HOST, DEFAULT_SIGNALING_PORT, ENV_SIGNALING_HOST, ENV_SIGNALING_PORT,
};
use linq_common::SignalingConfig;
use linq_relay::{shutdown_signal, Relay};

#[derive(Parser, Debug)]
#[command(name = "linq-relay")]
#[command(about = "linq signaling relay - forwards offers, answers and candidates between peers")]
struct Args {
    /// Interface to listen on
    #[arg(long, env = ENV_SIGNALING_HOST, default_value = DEFAULT_SIGNALING_HOST)]
    host: String,

    /// TCP port to listen on
    #[arg(long, env = ENV_SIGNALING_PORT, default_value_t = DEFAULT_SIGNALING_PORT)]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    linq_common::init_tracing_with_default(&args.log_level);

    let config = SignalingConfig {
        host: args.host,
        port: args.port,
        ..SignalingConfig::default()
    };

    let relay = Relay::bind(config.listen_addr()?).await?;
    relay.run_until(shutdown_signal()).await?;
    Ok(())
}
