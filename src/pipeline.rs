// 🚰 Pipeline - one batch run, stage by stage
// raw rows → payments → payout index → channel reports → files
//
// Every stage returns its value; nothing is shared or mutated between stages.

use crate::geoip::CountryResolver;
use crate::parser::ExportParser;
use crate::payment::{Channel, Payment, PaymentNormalizer};
use crate::payout::{IndexStats, PayoutIndexBuilder, ReconciliationIndex};
use crate::reconciliation::{ChannelReport, PeriodFilter, ReconciliationEngine};
use crate::report::write_reports;
use crate::schema::ExportLayout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Channels reported on every run, in output order
pub const REPORT_CHANNELS: [Channel; 2] = [Channel::Card, Channel::Wallet];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: Channel,
    pub rows: usize,
    pub excluded: usize,
    pub filtered: usize,
    pub discrepancies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub payments: usize,
    pub country_overrides: usize,
    pub index: IndexStats,
    pub channels: Vec<ChannelSummary>,
    pub written: Vec<PathBuf>,
}

pub struct Pipeline<'a> {
    layout: &'a ExportLayout,
    input_dir: &'a Path,
    resolver: &'a dyn CountryResolver,
}

impl<'a> Pipeline<'a> {
    pub fn new(layout: &'a ExportLayout, input_dir: &'a Path, resolver: &'a dyn CountryResolver) -> Self {
        Pipeline {
            layout,
            input_dir,
            resolver,
        }
    }

    /// Stage 1: every payment export, normalized, concatenated in layout order
    pub fn load_payments(&self) -> Result<Vec<Payment>> {
        let mut payments = Vec::new();

        for export in &self.layout.payment_exports {
            let format = export.format.resolve()?;
            let path = self.input_dir.join(&export.file);
            let rows = format
                .parse(&path)
                .with_context(|| format!("Failed to read payment export {}", path.display()))?;

            let normalizer = PaymentNormalizer::new(&format, self.resolver);
            payments.extend(normalizer.normalize_all(&rows)?);
        }

        Ok(payments)
    }

    /// Stage 2: payout index from the payout and payment-to-payout exports
    pub fn load_index(&self) -> Result<ReconciliationIndex> {
        let payout_export = &self.layout.payout_export;
        let link_export = &self.layout.link_export;

        let payout_path = self.input_dir.join(&payout_export.file);
        let payout_rows = payout_export
            .format
            .parse(&payout_path)
            .with_context(|| format!("Failed to read payout export {}", payout_path.display()))?;

        let link_path = self.input_dir.join(&link_export.file);
        let link_rows = link_export
            .format
            .parse(&link_path)
            .with_context(|| format!("Failed to read payment-to-payout export {}", link_path.display()))?;

        PayoutIndexBuilder::new(&payout_export.format, &link_export.format).build(&payout_rows, &link_rows)
    }

    /// Stages 1-3 without touching the output directory
    pub fn reconcile(&self, period: PeriodFilter) -> Result<(Vec<Payment>, ReconciliationIndex, Vec<ChannelReport>)> {
        let payments = self.load_payments()?;
        let index = self.load_index()?;

        let engine = ReconciliationEngine::new(period);
        let reports = REPORT_CHANNELS
            .iter()
            .map(|&channel| engine.run(&payments, &index, channel))
            .collect();

        Ok((payments, index, reports))
    }

    /// Full run: reconcile, then write one file per channel
    pub fn run(&self, period: PeriodFilter, output_dir: &Path) -> Result<RunSummary> {
        let (payments, index, reports) = self.reconcile(period)?;
        let written = write_reports(output_dir, &reports)?;

        Ok(RunSummary {
            payments: payments.len(),
            country_overrides: payments.iter().filter(|p| p.country_override.is_some()).count(),
            index: index.stats().clone(),
            channels: reports
                .iter()
                .map(|r| ChannelSummary {
                    channel: r.channel,
                    rows: r.rows.len(),
                    excluded: r.excluded,
                    filtered: r.filtered,
                    discrepancies: r.discrepancies.len(),
                })
                .collect(),
            written,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
