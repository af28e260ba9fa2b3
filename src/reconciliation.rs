// ⚖️ Reconciliation Engine - join payments to payouts, emit channel reports
//
// Payout-bearing channels report by period of cash receipt (payout arrival),
// channels without payout data by period of sale (payment timestamp).

use crate::amount::vat_percent_of;
use crate::payment::{Channel, Payment};
use crate::payout::{MatchOutcome, Payout, ReconciliationIndex};
use crate::temporal::format_report_date;
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// PERIOD FILTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("month {0} is outside 1-12")]
    InvalidMonth(u32),

    #[error("year {0} is not a calendar year")]
    InvalidYear(i32),
}

/// Optional reporting period: nothing, a year, or a month of a year
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodFilter {
    year: Option<i32>,
    month: Option<u32>,
}

impl PeriodFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn year(year: i32) -> Result<Self, PeriodError> {
        if year < 1 {
            return Err(PeriodError::InvalidYear(year));
        }
        Ok(PeriodFilter {
            year: Some(year),
            month: None,
        })
    }

    pub fn month(month: u32, year: i32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        if year < 1 {
            return Err(PeriodError::InvalidYear(year));
        }
        Ok(PeriodFilter {
            year: Some(year),
            month: Some(month),
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.year.is_none()
    }

    pub fn matches(&self, date: NaiveDateTime) -> bool {
        if let Some(month) = self.month {
            if date.month() != month {
                return false;
            }
        }
        if let Some(year) = self.year {
            if date.year() != year {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for PeriodFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.month, self.year) {
            (Some(month), Some(year)) => write!(f, "{:02}/{}", month, year),
            (_, Some(year)) => write!(f, "{}", year),
            _ => write!(f, "all periods"),
        }
    }
}

// ============================================================================
// MATCH AUDIT LOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// No link within the window for this customer
    MissingPayout,
    /// A link matched but its payout id is absent from the payout export
    UnresolvedPayout { payout_id: String },
    /// Several payouts inside the window; `chosen` was used
    AmbiguousPayout {
        chosen: String,
        candidates: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub customer_id: String,
    pub timestamp: NaiveDateTime,
    pub category: DiscrepancyCategory,
}

impl Discrepancy {
    /// Excluded from the report, as opposed to matched with a caveat
    pub fn is_exclusion(&self) -> bool {
        !matches!(self.category, DiscrepancyCategory::AmbiguousPayout { .. })
    }
}

// ============================================================================
// CHANNEL REPORT
// ============================================================================

const COMMON_HEADER: [&str; 9] = [
    "Datum", "Kundenname", "USD", "VAT", "%", "Land", "EU", "Privat", "USt-ID",
];

/// Header row for a channel's ledger report
pub fn report_header(channel: Channel) -> Vec<String> {
    let mut header: Vec<String> = COMMON_HEADER.iter().map(|s| s.to_string()).collect();
    if channel.requires_payout() {
        header.push("Transfer".to_string());
        header.push("EUR".to_string());
    }
    header.push("Rückerst".to_string());
    header
}

fn flag(value: bool) -> String {
    let marker = if value { "x" } else { "" };
    marker.to_string()
}

/// One report row; payout columns only for payout-bearing channels
pub fn report_row(payment: &Payment, payout: Option<&Payout>) -> Vec<String> {
    let mut row = vec![
        format_report_date(payment.timestamp),
        payment.customer_name.clone(),
        payment.amount.to_report_string(),
        payment.tax_amount.to_report_string(),
        vat_percent_of(payment.tax_amount, payment.amount),
        payment.country_code.clone(),
        flag(payment.is_eu),
        payment.customer_kind.marker().to_string(),
        payment.tax_number.clone(),
    ];
    if let Some(payout) = payout {
        row.push(format_report_date(payout.arrival_date));
        row.push(payout.amount.to_report_string());
    }
    row.push(flag(payment.is_refund));
    row
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub discrepancies: Vec<Discrepancy>,
    /// Payments of this channel considered
    pub considered: usize,
    /// Dropped for a missing or unresolved payout
    pub excluded: usize,
    /// Dropped by the period filter
    pub filtered: usize,
}

impl ChannelReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} of {} payments reported, {} without payout, {} outside period, {} discrepancies",
            self.channel.name(),
            self.rows.len(),
            self.considered,
            self.excluded,
            self.filtered,
            self.discrepancies.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    pub period: PeriodFilter,
}

impl ReconciliationEngine {
    pub fn new(period: PeriodFilter) -> Self {
        ReconciliationEngine { period }
    }

    /// Build one channel's report from the payments, in input order
    pub fn run(&self, payments: &[Payment], index: &ReconciliationIndex, channel: Channel) -> ChannelReport {
        let mut report = ChannelReport {
            channel,
            header: report_header(channel),
            rows: Vec::new(),
            discrepancies: Vec::new(),
            considered: 0,
            excluded: 0,
            filtered: 0,
        };

        for payment in payments.iter().filter(|p| p.channel == Some(channel)) {
            report.considered += 1;

            if !channel.requires_payout() {
                if self.period.matches(payment.timestamp) {
                    report.rows.push(report_row(payment, None));
                } else {
                    report.filtered += 1;
                }
                continue;
            }

            let outcome = index.lookup(&payment.customer_id, payment.timestamp);
            if let Some(discrepancy) = discrepancy_for(payment, &outcome) {
                tracing::warn!(
                    channel = channel.name(),
                    customer = %payment.customer_id,
                    timestamp = %payment.timestamp,
                    category = ?discrepancy.category,
                    excluded = discrepancy.is_exclusion(),
                    "payout match discrepancy"
                );
                report.discrepancies.push(discrepancy);
            }

            let Some(payout) = outcome.payout() else {
                report.excluded += 1;
                continue;
            };

            if self.period.matches(payout.arrival_date) {
                report.rows.push(report_row(payment, Some(payout)));
            } else {
                report.filtered += 1;
            }
        }

        tracing::info!("{}", report.summary());
        report
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(PeriodFilter::all())
    }
}

fn discrepancy_for(payment: &Payment, outcome: &MatchOutcome<'_>) -> Option<Discrepancy> {
    let category = match outcome {
        MatchOutcome::Matched(_) => return None,
        MatchOutcome::Missed => DiscrepancyCategory::MissingPayout,
        MatchOutcome::Unresolved { payout_id } => DiscrepancyCategory::UnresolvedPayout {
            payout_id: payout_id.clone(),
        },
        MatchOutcome::Ambiguous {
            chosen,
            candidate_payout_ids,
        } => DiscrepancyCategory::AmbiguousPayout {
            chosen: chosen.id.clone(),
            candidates: candidate_payout_ids.clone(),
        },
    };

    Some(Discrepancy {
        customer_id: payment.customer_id.clone(),
        timestamp: payment.timestamp,
        category,
    })
}

// ============================================================================
// TESTS
// ============================================================================
