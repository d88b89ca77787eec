//! linq CLI: run a signaling relay or negotiate a peer connection through one.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linq_common::config::{ENV_SIGNALING_HOST, ENV_SIGNALING_PORT};
use linq_common::SignalingConfig;
use linq_peer::{
    Connectivity, NegotiationSession, Role, SimulatedConnectivity, TransportChannel,
    WebRtcConnectivity,
};
use linq_relay::{shutdown_signal, Relay, RelayHealth};
use tracing::{debug, info};

const PEER_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "linq")]
#[command(about = "linq signaling relay and peer negotiation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling relay
    Relay {
        /// Interface to listen on
        #[arg(long, env = ENV_SIGNALING_HOST)]
        host: Option<String>,

        /// TCP port to listen on
        #[arg(long, env = ENV_SIGNALING_PORT)]
        port: Option<u16>,
    },

    /// Negotiate a peer connection through a relay.
    ///
    /// The relay does not buffer messages, so an initiator waits until the
    /// relay reports a second client before it sends its offer.
    Call {
        /// initiator or responder
        #[arg(short, long)]
        role: Role,

        /// Relay host
        #[arg(long, env = ENV_SIGNALING_HOST)]
        host: Option<String>,

        /// Relay port
        #[arg(long, env = ENV_SIGNALING_PORT)]
        port: Option<u16>,

        /// STUN server URL, repeatable. Defaults to LINQ_STUN_SERVERS or the built-in list
        #[arg(long = "stun")]
        stun: Vec<String>,

        /// Use the in-process simulated backend instead of webrtc
        #[arg(long)]
        simulate: bool,
    },

    /// Show version information
    Version,
}

fn resolve_config(
    host: Option<String>,
    port: Option<u16>,
    stun: Vec<String>,
) -> Result<SignalingConfig> {
    let mut config = SignalingConfig::from_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if !stun.is_empty() {
        config.stun_servers = stun;
    }
    Ok(config)
}

async fn run_relay(config: SignalingConfig) -> Result<()> {
    let relay = Relay::bind(config.listen_addr()?).await?;
    println!("linq relay listening on {}", relay.local_addr()?);
    relay.run_until(shutdown_signal()).await?;
    Ok(())
}

/// Poll the relay's health endpoint until this client and at least one
/// other are connected.
async fn wait_for_peer(health_url: &str, poll: Duration) -> Result<()> {
    let client = reqwest::Client::new();
    loop {
        let health: RelayHealth = client
            .get(health_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("relay reports {} connected clients", health.connected_clients);
        if health.connected_clients >= 2 {
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
}

async fn run_call(role: Role, config: SignalingConfig, simulate: bool) -> Result<()> {
    let url = config.ws_url();
    let channel = TransportChannel::connect(&url)
        .await
        .with_context(|| format!("failed to reach relay at {}", url))?;

    if role == Role::Initiator {
        println!("waiting for a responder to join the relay");
        let health_url = config.health_url();
        tokio::select! {
            waited = wait_for_peer(&health_url, PEER_POLL_INTERVAL) => {
                waited.context("failed to query relay health")?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted before a responder joined");
                return Ok(());
            }
        }
    }

    let (backend, events): (Box<dyn Connectivity>, _) = if simulate {
        let (backend, events) = SimulatedConnectivity::new();
        (Box::new(backend), events)
    } else {
        let (backend, events) = WebRtcConnectivity::new(&config.stun_servers).await?;
        (Box::new(backend), events)
    };

    let session = NegotiationSession::start(role, backend, events, channel);
    let mut status = session.subscribe();
    println!("{} started, state {}", role, status.borrow().state);

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match &current.error {
                    Some(err) => println!("state {} ({})", current.state, err),
                    None => println!("state {}", current.state),
                }
                if current.state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping session");
                break;
            }
        }
    }

    let final_status = session.stop().await;
    println!("session ended in state {}", final_status.state);
    match final_status.error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    linq_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Relay { host, port } => {
            let config = resolve_config(host, port, Vec::new())?;
            run_relay(config).await?;
        }
        Command::Call {
            role,
            host,
            port,
            stun,
            simulate,
        } => {
            let config = resolve_config(host, port, stun)?;
            run_call(role, config, simulate).await?;
        }
        Command::Version => {
            println!("linq {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initiator_waits_for_second_client() {
        let relay = Relay::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = relay.local_addr().unwrap();
        tokio::spawn(relay.run());

        let config = SignalingConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..SignalingConfig::default()
        };
        let _initiator = TransportChannel::connect(&config.ws_url()).await.unwrap();

        let health_url = config.health_url();
        let waiting = tokio::spawn(async move {
            wait_for_peer(&health_url, Duration::from_millis(20)).await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiting.is_finished(), "returned with a single client");

        let _responder = TransportChannel::connect(&config.ws_url()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .expect("still waiting after the responder joined")
            .unwrap()
            .unwrap();
    }
}
