use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use payout_recon::{Config, CountryResolver, ExportLayout, PeriodFilter, Pipeline};

/// Reconcile shop payments against processor payouts and write VAT ledger reports
#[derive(Parser)]
#[command(name = "payout-recon", version)]
#[command(about = "Reconcile payments with payouts and write per-channel VAT reports")]
struct Cli {
    /// Year, or month when a year follows
    first: Option<i32>,

    /// Year (makes the first argument the month)
    second: Option<i32>,
}

impl Cli {
    fn period(&self) -> Result<PeriodFilter> {
        match (self.first, self.second) {
            (None, _) => Ok(PeriodFilter::all()),
            (Some(year), None) => Ok(PeriodFilter::year(year)?),
            (Some(month), Some(year)) => {
                let Ok(month) = u32::try_from(month) else {
                    bail!("month must be positive, got {}", month);
                };
                Ok(PeriodFilter::month(month, year)?)
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::debug!(version = payout_recon::VERSION, "payout-recon starting");

    let cli = Cli::parse();
    let period = cli.period()?;
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let layout = match &config.layout_file {
        Some(path) => ExportLayout::from_file(path)?,
        None => ExportLayout::default(),
    };

    if !period.is_unbounded() {
        tracing::info!("Limiting output to {}", period);
    }

    let resolver = country_resolver(&config);
    let pipeline = Pipeline::new(&layout, &config.input_dir, resolver.as_ref());

    println!("📂 Reading exports from {}", config.input_dir.display());
    let summary = pipeline.run(period, &config.output_dir)?;

    println!("✓ {} payments normalized ({} country overrides)", summary.payments, summary.country_overrides);
    for channel in &summary.channels {
        println!(
            "✓ {}: {} rows, {} without payout, {} outside period",
            channel.channel.name(),
            channel.rows,
            channel.excluded,
            channel.filtered
        );
    }
    for path in &summary.written {
        println!("💾 {}", path.display());
    }

    Ok(())
}

#[cfg(feature = "geoip")]
fn country_resolver(config: &Config) -> Box<dyn CountryResolver> {
    Box::new(payout_recon::HttpCountryResolver::new(config.geoip_url.clone()))
}

#[cfg(not(feature = "geoip"))]
fn country_resolver(_config: &Config) -> Box<dyn CountryResolver> {
    tracing::warn!("built without the geoip feature: ambiguous VAT rates will abort the run");
    Box::new(payout_recon::OfflineCountryResolver)
}
