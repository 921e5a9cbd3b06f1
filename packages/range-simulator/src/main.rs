//! main.rs: synthetic gateway for the positioning backend
//!
//! Each epoch:
//!   1. Advances every simulated tag (bounded random walk)
//!   2. Ranges each tag against the configured anchors with noise and dropout
//!   3. Sends the epoch's batch to the ingest hub over UDP
//!
//! `--print-anchors` writes the anchor directory JSON the backend loads
//! (`ANCHORS_FILE`) and exits.

mod range_physics;
mod tag_sim;
mod udp_tx;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::time::interval;
use tracing::info;

use position_types::Anchor;
use range_physics::{RadioConfig, RangeModel};
use tag_sim::{TagConfig, TagSim};
use udp_tx::UdpTransmitter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "range-sim", about = "Synthetic UWB gateway feeding the positioning backend")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// UDP ingest hub address
    #[arg(long, default_value = "127.0.0.1:5555")]
    hub_addr: String,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Print the anchor directory JSON and exit
    #[arg(long)]
    print_anchors: bool,
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FullConfig {
    simulation: SimulationConfig,
    anchors: Vec<AnchorConfig>,
    tags: TagConfig,
    radio: RadioConfig,
}

#[derive(Debug, Deserialize)]
struct SimulationConfig {
    update_rate_hz: f64,
    gateway_id: String,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnchorConfig {
    anchor_id: String,
    position: [f64; 3],
    #[serde(default = "default_true")]
    active: bool,
    description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl FullConfig {
    fn directory(&self) -> Vec<Anchor> {
        self.anchors
            .iter()
            .map(|a| {
                let mut anchor = Anchor::new(a.anchor_id.clone(), a.position[0], a.position[1], a.position[2]);
                anchor.active = a.active;
                anchor.description = a.description.clone();
                anchor
            })
            .collect()
    }
}

fn load_config(path: &str) -> anyhow::Result<FullConfig> {
    let config_str = std::fs::read_to_string(path)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    toml::from_str(&config_str).with_context(|| format!("invalid config {path}"))
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "range_simulator=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    let anchors = cfg.directory();

    if args.print_anchors {
        println!("{}", serde_json::to_string_pretty(&anchors)?);
        return Ok(());
    }

    anyhow::ensure!(cfg.simulation.update_rate_hz > 0.0, "update_rate_hz must be positive");
    anyhow::ensure!(args.speed > 0.0, "--speed must be positive");

    let mut rng = match cfg.simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sim = TagSim::new(&cfg.tags, &mut rng).context("invalid [tags] turn_sigma_rad")?;
    let model = RangeModel::new(&cfg.radio).context("invalid [radio] sigma_m")?;
    let transmitter = UdpTransmitter::new(&args.hub_addr).context("binding UDP socket")?;

    info!(
        "📡 Range simulator starting: {} tags, {} anchors, {} Hz → {}",
        sim.tags.len(),
        anchors.len(),
        cfg.simulation.update_rate_hz,
        args.hub_addr
    );

    let epoch = Duration::from_secs_f64(1.0 / cfg.simulation.update_rate_hz);
    let dt = epoch.as_secs_f64() * args.speed;
    let mut ticker = interval(epoch);
    let mut epoch_counter: u64 = 0;

    loop {
        ticker.tick().await;
        sim.tick(dt, &mut rng);
        epoch_counter += 1;

        let batch = model.generate_batch(&cfg.simulation.gateway_id, &sim.tags, &anchors, &mut rng);
        transmitter.send_batch(&batch);

        if epoch_counter % 20 == 0 {
            info!("⏱ epoch={} | measurements={}", epoch_counter, batch.measurements.len());
        }
    }
}
