//! Generate the fallback directory list from relay details and uptime documents.
//!
//! ```bash
//! fallback-dirs --details details.json --uptime uptime.json > fallback_dirs.inc
//! ```
//!
//! Read the generated list before committing it, to make sure nobody slipped anything odd into
//! a nickname or contact.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fallback_dirs::{settings, source, Report};
use fallback_selection::{CandidateSet, RawRelayDetails, UptimeDocument};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fallback-dirs")]
#[command(about = "Select fallback directory mirrors from relay documents")]
#[command(version)]
struct Args {
    /// Relay details document (JSON)
    #[arg(long)]
    details: PathBuf,

    /// Relay uptime document (JSON)
    #[arg(long)]
    uptime: PathBuf,

    /// JSON file overriding the default selection thresholds
    #[arg(long)]
    config: Option<PathBuf>,

    /// Evaluate histories and stability as of this time (default: now)
    #[arg(long)]
    now: Option<String>,

    /// Write the list here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Maximum number of fallbacks
    #[arg(long)]
    max_count: Option<usize>,

    /// Minimum number of fallbacks before the output fails to build
    #[arg(long)]
    min_count: Option<usize>,

    /// Maximum fraction of total weight on a single fallback
    #[arg(long)]
    target_max_fraction: Option<f64>,

    /// Headroom applied to the target fraction while capping
    #[arg(long)]
    fudge_factor: Option<f64>,

    /// Fallbacks below this fraction of total weight are dropped
    #[arg(long)]
    min_weight_fraction: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = settings::load_config(args.config.as_deref())?;
    if let Some(max_count) = args.max_count {
        config.max_fallback_count = max_count;
    }
    if let Some(min_count) = args.min_count {
        config.min_fallback_count = min_count;
    }
    if let Some(target) = args.target_max_fraction {
        config.target_max_weight_fraction = target;
    }
    if let Some(fudge) = args.fudge_factor {
        config.reweighting_fudge_factor = fudge;
    }
    if let Some(min_fraction) = args.min_weight_fraction {
        config.min_weight_fraction = min_fraction;
    }
    config.validate()?;

    let now = match args.now.as_deref() {
        Some(now) => settings::parse_now(now)?,
        None => chrono::Utc::now(),
    };

    let (details, details_source) = source::load::<RawRelayDetails>("details", &args.details)?;
    let (uptime, uptime_source) = source::load::<UptimeDocument>("uptime", &args.uptime)?;

    let mut candidates = CandidateSet::from_details(details.relays);
    if candidates.is_empty() {
        bail!("no usable relays in {}", details_source.location);
    }
    candidates.add_uptimes(uptime.relays, now);
    let selection = candidates
        .compute_fallbacks(&config, now)
        .context("fallback selection failed")?;

    let sources = [details_source, uptime_source];
    let report = Report {
        sources: &sources,
        selection: &selection,
        config: &config,
    };
    let rendered = report.to_string();
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("writing {path:?}"))?
        }
        None => std::io::stdout()
            .write_all(rendered.as_bytes())
            .context("writing to stdout")?,
    }
    tracing::info!(
        relays = candidates.len(),
        fallbacks = selection.stats.final_count,
        "fallback list written"
    );
    Ok(())
}
