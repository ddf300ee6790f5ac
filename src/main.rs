use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lancast::webrtc::{EventKind, Identity, SignalingRole, WebRtcController};
use lancast::Config;
use tracing::debug;

#[derive(Parser)]
#[command(name = "lancast")]
#[command(about = "Serverless LAN peer discovery and signaling for screen mirroring", long_about = None)]
struct Cli {
    /// Device id advertised to the subnet (default: hostname + salt)
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Local IP address used for own-traffic suppression
    #[arg(long, default_value = "0.0.0.0", global = true)]
    local_ip: String,

    /// UDP discovery port
    #[arg(long, default_value_t = 7777, global = true)]
    discovery_port: u16,

    /// UDP signaling port
    #[arg(long, default_value_t = 9999, global = true)]
    signaling_port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a peer: discover others and relay signaling
    Start {
        /// Act as the WebRTC offerer
        #[arg(long)]
        offerer: bool,
    },
    /// Run as a mirroring source: advertise availability on the subnet
    Source,
    /// One-shot scan for an available mirroring source
    Scan,
    /// Send a single signaling payload to a peer and exit
    Send {
        /// Target address (`ip` or `ip:port`)
        target: String,
        /// Opaque payload to deliver
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lancast=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let identity = match &cli.device_id {
        Some(id) => Identity::new(id.clone(), cli.local_ip.clone()),
        None => Identity::generate(cli.local_ip.clone()),
    };

    let mut config = Config::default();
    config.discovery.port = cli.discovery_port;
    config.signaling.port = cli.signaling_port;

    let (controller, mut events) = WebRtcController::new(identity, config);
    controller
        .initialize()
        .map_err(|e| anyhow::anyhow!(e))
        .context("initialization failed")?;

    println!("Device: {}", controller.identity().device_id);
    println!("Local IP: {}", controller.identity().local_ip);

    match cli.command {
        Commands::Start { offerer } => {
            controller
                .start_discovery()
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let role = if offerer {
                SignalingRole::Offerer
            } else {
                SignalingRole::Answerer
            };
            controller
                .start_signaling(role)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "Discovering on port {}, signaling on port {} ({role})",
                cli.discovery_port, cli.signaling_port
            );
            println!("Press Ctrl-C to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    Some(ev) = events.recv() => print_event(&ev.to_json()),
                }
            }
            controller.stop_all().await.map_err(|e| anyhow::anyhow!(e))?;
        }
        Commands::Source => {
            controller
                .start_broadcast_server()
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "Advertising mirroring source on port {} (signaling port {})",
                cli.discovery_port, cli.signaling_port
            );
            println!("Press Ctrl-C to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    Some(ev) = events.recv() => print_event(&ev.to_json()),
                }
            }
            controller.stop_all().await.map_err(|e| anyhow::anyhow!(e))?;
        }
        Commands::Scan => {
            controller
                .start_discovery_client()
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Scanning for mirroring sources...");

            while let Some(ev) = events.recv().await {
                match ev.kind {
                    EventKind::SourceDiscovered => {
                        println!(
                            "Found source {} at {} (signaling port {})",
                            ev.data["sourceDeviceId"], ev.data["sourceIP"],
                            ev.data["signalingPort"]
                        );
                        break;
                    }
                    EventKind::NoSourcesFound => {
                        println!("No sources found");
                        break;
                    }
                    _ => debug!("event: {}", ev.kind),
                }
            }
        }
        Commands::Send { target, payload } => {
            controller
                .send_signaling(&payload, &target)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Sent {} bytes to {target}", payload.len());
        }
    }

    Ok(())
}

fn print_event(value: &serde_json::Value) {
    println!("[{}] {}", value["type"].as_str().unwrap_or("?"), value["data"]);
}
