//! LMESH CLI - Command line tools for running and inspecting the radio mesh

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use lmesh_core::payload::{decode_link_report, decode_trace_announcements};
use lmesh_core::wire::UNASSIGNED;
use lmesh_core::{compute_routes, ControllerConfig, Invite, JoinReport, JoinRequest, Message, MessageType, RouteNode};
use lmesh_runtime::{NodeConfig, SimulatedMesh, SimulationConfig, Topology};

#[derive(Parser)]
#[command(name = "lmesh")]
#[command(about = "LMESH - Controller-managed LoRa mesh protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show versions and default protocol settings
    Status,

    /// Simulate a mesh with one controller-linked node
    Sim {
        /// Number of stations
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Station layout (line, star, grid)
        #[arg(short, long, default_value = "line")]
        topology: Topology,

        /// Reception probability of every link
        #[arg(short, long, default_value = "1.0")]
        reception: f64,

        /// Simulated seconds to run
        #[arg(short, long, default_value = "600")]
        seconds: u64,
    },

    /// Decode a hex encoded frame
    Decode {
        /// Frame bytes, e.g. 4185020a
        frame: String,
    },

    /// Compute routing registries from a JSON array of link reports
    Route {
        /// File holding `[{"address": 1, "controller": true, "links": {"2": 0.9}}, ...]`
        file: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Status => cmd_status(),
        Commands::Sim {
            nodes,
            topology,
            reception,
            seconds,
        } => cmd_sim(nodes, topology, reception, seconds).await,
        Commands::Decode { frame } => cmd_decode(&frame),
        Commands::Route { file } => cmd_route(&file),
    }
}

fn cmd_status() -> Result<()> {
    println!("╔═══════════════════════════════════════╗");
    println!("║         LMESH Status Check            ║");
    println!("╚═══════════════════════════════════════╝");
    println!();

    println!("✓ lmesh-core: OK");
    println!("  Version: {}", lmesh_core::VERSION);
    println!("✓ lmesh-runtime: OK");
    println!();

    let controller = ControllerConfig::default();
    println!("Controller defaults:");
    println!("  Mesh channel: {}", controller.mesh_channel);
    println!("  Address limit: {}", controller.address_limit);
    println!("  Freshness window: {}s", controller.freshness_window_ms / 1000);
    println!();

    let node = NodeConfig::default();
    println!("Node defaults:");
    println!("  Hello period: {}s", node.hello_period_ms / 1000);
    println!("  Link report period: {}s", node.link_report_period_ms / 1000);
    println!("  Join volley: {}", node.join_volley);
    println!("  Cache capacity: {}", node.cache_capacity);
    println!("  Tracing: {}", if node.tracing_enabled { "enabled" } else { "disabled" });

    Ok(())
}

async fn cmd_sim(nodes: usize, topology: Topology, reception: f64, seconds: u64) -> Result<()> {
    if nodes == 0 {
        bail!("a mesh needs at least one station");
    }

    println!("╔═══════════════════════════════════════╗");
    println!("║         LMESH Simulation              ║");
    println!("╚═══════════════════════════════════════╝");
    println!();
    println!("Stations: {}", nodes);
    println!("Topology: {}", topology);
    println!("Reception: {:.2}", reception);
    println!("Simulated time: {}s", seconds);
    println!();

    // simulated time runs on its own paused clock
    let start = std::time::Instant::now();
    let report = tokio::task::spawn_blocking(move || -> Result<String> {
        let clock = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .context("building simulation runtime")?;
        clock.block_on(run_sim(nodes, topology, reception, seconds))
    })
    .await??;

    println!("{}", report);
    println!();
    println!("Simulation complete in {:.2}ms", start.elapsed().as_millis());
    Ok(())
}

async fn run_sim(nodes: usize, topology: Topology, reception: f64, seconds: u64) -> Result<String> {
    let mesh = SimulatedMesh::with_topology(
        topology,
        nodes,
        reception,
        SimulationConfig::default(),
        ControllerConfig::default(),
        NodeConfig::default(),
    );
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let snapshots = mesh.snapshots().await;
    let members = snapshots.iter().filter(|s| s.address.is_some()).count();
    println!("Frames on air: {}", mesh.medium().frames());
    println!("Stations with an address: {}/{}", members, nodes);
    println!();

    mesh.shutdown();
    Ok(serde_json::to_string_pretty(&snapshots)?)
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).with_context(|| format!("bad hex byte at {}", i)))
        .collect()
}

fn cmd_decode(frame: &str) -> Result<()> {
    let message = Message::from_frame(&parse_hex(frame)?)?;
    let header = message.header;
    let kind = header.pure_type()?;

    println!("Header: {}", header);
    println!("  Type: {}", kind);
    println!("  Direction: {}", if header.is_downwards() { "downwards" } else { "upwards" });
    println!("  Address: {}", header.node_address());
    println!("  Counter: {}", header.counter());
    println!("  Multipurpose: {}", header.is_resend());
    println!("Payload: {:?}", message.payload);

    match kind {
        MessageType::Hello if header.node_address() == UNASSIGNED => {
            println!("  Join request from {}", JoinRequest::decode(&message.payload)?.identity);
        }
        MessageType::Hello => {
            for tracing in decode_trace_announcements(&message.payload)? {
                println!("  Announces {} counter {}", tracing.address(), tracing.counter());
            }
        }
        MessageType::Join if header.is_downwards() => {
            let invite = Invite::decode(&message.payload)?;
            println!("  Invites {} as {}", invite.identity, invite.assigned);
        }
        MessageType::Join => {
            let report = JoinReport::decode(&message.payload)?;
            println!("  Heard {} at reliability {}/255", report.identity, report.reliability);
        }
        MessageType::Routing if !header.is_downwards() => {
            for (neighbor, reliability) in decode_link_report(&message.payload)? {
                println!("  Link {}: {:.2}", neighbor, reliability);
            }
        }
        _ => {}
    }
    Ok(())
}

fn cmd_route(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let nodes: Vec<RouteNode> = serde_json::from_str(&text).context("parsing link reports")?;
    let table = compute_routes(&nodes);
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x4185 020a").unwrap(), vec![0x41, 0x85, 0x02, 0x0a]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_cli_parses_sim() {
        let cli = Cli::parse_from(["lmesh", "sim", "--topology", "grid", "--nodes", "9"]);
        match cli.command {
            Commands::Sim { nodes, topology, .. } => {
                assert_eq!(nodes, 9);
                assert_eq!(topology, Topology::Grid);
            }
            _ => panic!("expected sim"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_topology() {
        let error = Cli::try_parse_from(["lmesh", "sim", "--topology", "ring"]).err().unwrap();
        assert!(error.to_string().contains("Unknown topology: ring"));
    }
}
