//! Demonstration history seeder
//!
//! Writes synthetic wafer records into the sled store so the SPC, RCA,
//! copilot and digest views have something to show. Five tools across three
//! chambers; TOOL-3 is deliberately worse, leaning toward Scratch and
//! Edge-Ring defects.
//!
//! # Usage
//! ```bash
//! ./seed-history --days 30 --data-dir ./data
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal, Poisson};

use wafer_sentinel::agents::{AnalysisStage, PatternHistory};
use wafer_sentinel::storage::{ProcessLock, SledWaferStore, WaferRepository};
use wafer_sentinel::types::{DefectPattern, StageDetails, Verdict, WaferAnalysis};

const TOOLS: [&str; 5] = ["TOOL-1", "TOOL-2", "TOOL-3", "TOOL-4", "TOOL-5"];
const CHAMBERS: [&str; 3] = ["A", "B", "C"];
const WAFERS_PER_LOT: u32 = 25;

/// Baseline defect probability per wafer
const BASE_DEFECT_RATE: f64 = 0.08;
/// Defect probability for the biased tool
const BIASED_DEFECT_RATE: f64 = 0.30;
const BIASED_TOOL: &str = "TOOL-3";

#[derive(Parser, Debug)]
#[command(name = "seed-history")]
#[command(about = "Seed synthetic wafer history for demonstrations")]
#[command(version)]
struct Args {
    /// Days of history to generate, ending now
    #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=365))]
    days: u32,

    /// Mean lots processed per day
    #[arg(long, default_value = "3.0")]
    lots_per_day: f64,

    /// Data directory holding the wafer store
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

fn pick_pattern(rng: &mut StdRng, tool: &str) -> DefectPattern {
    let defects = &DefectPattern::ALL[..DefectPattern::ALL.len() - 1];
    if tool == BIASED_TOOL && rng.gen_bool(0.7) {
        return if rng.gen_bool(0.5) { DefectPattern::Scratch } else { DefectPattern::EdgeRing };
    }
    defects[rng.gen_range(0..defects.len())]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let lots = Poisson::new(args.lots_per_day.max(0.1)).context("lots-per-day must be positive")?;
    let confidence = Normal::<f64>::new(0.86, 0.07).context("invalid confidence distribution")?;

    let _lock = ProcessLock::acquire(&args.data_dir).context("Stop the server before seeding")?;
    let store = SledWaferStore::open(args.data_dir.join("wafers.db"))?;
    let analysis = AnalysisStage::default();
    let no_history = PatternHistory::default();

    let now = Utc::now();
    let mut written = 0usize;
    for day in (0..args.days).rev() {
        let day_start = now - Duration::days(i64::from(day) + 1);
        let lot_count = lots.sample(&mut rng) as u32;

        for lot in 0..lot_count {
            let lot_id = format!("LOT-{}-{:02}", day_start.format("%Y%m%d"), lot + 1);
            let tool = TOOLS[rng.gen_range(0..TOOLS.len())];
            let chamber = CHAMBERS[rng.gen_range(0..CHAMBERS.len())];
            let defect_rate = if tool == BIASED_TOOL { BIASED_DEFECT_RATE } else { BASE_DEFECT_RATE };
            let lot_start = day_start + Duration::minutes(rng.gen_range(0..20 * 60));

            for slot in 0..WAFERS_PER_LOT {
                let at = lot_start + Duration::seconds(i64::from(slot) * 90);
                let defective = rng.gen_bool(defect_rate);
                let pattern = if defective { pick_pattern(&mut rng, tool) } else { DefectPattern::NoDefect };
                let conf = confidence.sample(&mut rng).clamp(0.5, 0.99);
                let wafer_id = format!("{lot_id}-W{:02}", slot + 1);

                let record = WaferAnalysis {
                    file_name: format!("{wafer_id}.npy"),
                    wafer_id,
                    lot_id: Some(lot_id.clone()),
                    tool_id: Some(tool.to_string()),
                    chamber_id: Some(chamber.to_string()),
                    processed_at: Some(at),
                    analyzed_at: at,
                    agents: Vec::new(),
                    selected_agent: Some("seed".to_string()),
                    pattern,
                    confidence: conf,
                    verdict: if defective { Verdict::Fail } else { Verdict::Pass },
                    severity: analysis.severity(pattern, conf, &no_history),
                    probabilities: None,
                    explanation: format!("Synthetic {pattern} record"),
                    stages: StageDetails::default(),
                    failure: None,
                };
                store.insert(&record)?;
                written += 1;
            }
        }
    }

    store.flush()?;
    tracing::info!(
        records = written,
        days = args.days,
        data_dir = %args.data_dir.display(),
        "Seeded wafer history"
    );
    Ok(())
}
