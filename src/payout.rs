// 🔗 Payout Index - fuzzy join structure for payment → payout lookups
//
// The shop export has no processor payment id, so payments are matched by
// (customer id, minute). Each link is stored under its own minute and the
// minutes on either side, because both systems stamp the same event
// independently and may round across a minute boundary.

use crate::amount::Amount;
use crate::parser::{RawLink, RawPayout, SourceLocation};
use crate::schema::{LinkFormat, PayoutFormat};
use crate::temporal::{parse_timestamp, truncate_to_minute};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Maximum distance between a payment and its link for the two to join
pub const FUZZ_WINDOW_SECONDS: i64 = 60;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Payout - one settlement batch into the merchant's bank account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub arrival_date: NaiveDateTime,
    pub amount: Amount,
    pub status: String,
}

/// Which payout a processor payment was bundled into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayoutLink {
    pub payment_id: String,
    pub customer_id: String,
    pub timestamp: NaiveDateTime,
    pub payout_id: String,
    pub status: String,
    pub location: SourceLocation,
}

/// (customer id, minute) join key. Not authoritative: two customers sharing an
/// identifier and a minute collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconciliationKey {
    customer_id: String,
    minute: NaiveDateTime,
}

impl ReconciliationKey {
    pub fn new(customer_id: &str, timestamp: NaiveDateTime) -> Self {
        ReconciliationKey {
            customer_id: customer_id.to_string(),
            minute: truncate_to_minute(timestamp),
        }
    }

    pub fn shifted(&self, minutes: i64) -> Self {
        ReconciliationKey {
            customer_id: self.customer_id.clone(),
            minute: self.minute + Duration::minutes(minutes),
        }
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn minute(&self) -> NaiveDateTime {
        self.minute
    }
}

/// One indexed link. `payout` is `None` when the payout export lacks its id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub link: PaymentPayoutLink,
    pub payout: Option<Payout>,
}

/// Result of looking a payment up in the index
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched(&'a Payout),
    /// Several distinct payouts inside the window; the closest link won
    Ambiguous {
        chosen: &'a Payout,
        candidate_payout_ids: Vec<String>,
    },
    /// A link matched but its payout is missing from the payout export
    Unresolved { payout_id: String },
    Missed,
}

impl<'a> MatchOutcome<'a> {
    pub fn payout(&self) -> Option<&'a Payout> {
        match self {
            MatchOutcome::Matched(payout) => Some(*payout),
            MatchOutcome::Ambiguous { chosen, .. } => Some(*chosen),
            MatchOutcome::Unresolved { .. } | MatchOutcome::Missed => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub payouts: usize,
    pub duplicate_payout_ids: usize,
    pub links_indexed: usize,
    pub links_skipped: usize,
    pub unresolved_links: usize,
}

// ============================================================================
// RECONCILIATION INDEX
// ============================================================================

#[derive(Debug)]
pub struct ReconciliationIndex {
    entries: Vec<IndexEntry>,
    buckets: HashMap<ReconciliationKey, Vec<usize>>,
    window: Duration,
    /// Span one link timestamp stands for: a minute-precision `10:00` is any of 10:00:00..=10:00:59
    precision: Duration,
    stats: IndexStats,
}

impl ReconciliationIndex {
    fn new(stats: IndexStats, precision: Duration) -> Self {
        ReconciliationIndex {
            entries: Vec::new(),
            buckets: HashMap::new(),
            window: Duration::seconds(FUZZ_WINDOW_SECONDS),
            precision,
            stats,
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        let key = ReconciliationKey::new(&entry.link.customer_id, entry.link.timestamp);
        let position = self.entries.len();
        self.entries.push(entry);

        for shift in [-1, 0, 1] {
            self.buckets.entry(key.shifted(shift)).or_default().push(position);
        }
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Distance from `timestamp` to the closest instant the link may have happened at
    fn distance(&self, link: &PaymentPayoutLink, timestamp: NaiveDateTime) -> Duration {
        let earliest = link.timestamp;
        let latest = link.timestamp + self.precision - Duration::seconds(1);

        if timestamp < earliest {
            earliest - timestamp
        } else if timestamp > latest {
            timestamp - latest
        } else {
            Duration::zero()
        }
    }

    /// Best-effort match of a payment to its payout
    pub fn lookup(&self, customer_id: &str, timestamp: NaiveDateTime) -> MatchOutcome<'_> {
        let key = ReconciliationKey::new(customer_id, timestamp);
        let Some(positions) = self.buckets.get(&key) else {
            return MatchOutcome::Missed;
        };

        let mut candidates: Vec<(Duration, &IndexEntry)> = positions
            .iter()
            .map(|&position| &self.entries[position])
            .map(|entry| (self.distance(&entry.link, timestamp), entry))
            .filter(|(distance, _)| *distance <= self.window)
            .collect();

        if candidates.is_empty() {
            return MatchOutcome::Missed;
        }
        // Stable: ties keep insertion order
        candidates.sort_by_key(|(distance, _)| *distance);

        let chosen = candidates.iter().find_map(|&(_, entry)| entry.payout.as_ref());
        let Some(chosen) = chosen else {
            return MatchOutcome::Unresolved {
                payout_id: candidates[0].1.link.payout_id.clone(),
            };
        };

        let distinct: BTreeSet<&str> = candidates
            .iter()
            .map(|(_, entry)| entry.link.payout_id.as_str())
            .collect();

        if distinct.len() > 1 {
            MatchOutcome::Ambiguous {
                chosen,
                candidate_payout_ids: distinct.into_iter().map(str::to_string).collect(),
            }
        } else {
            MatchOutcome::Matched(chosen)
        }
    }
}

// ============================================================================
// INDEX BUILDER
// ============================================================================

pub struct PayoutIndexBuilder<'a> {
    payout_format: &'a PayoutFormat,
    link_format: &'a LinkFormat,
}

impl<'a> PayoutIndexBuilder<'a> {
    pub fn new(payout_format: &'a PayoutFormat, link_format: &'a LinkFormat) -> Self {
        PayoutIndexBuilder {
            payout_format,
            link_format,
        }
    }

    pub fn parse_payout(&self, row: &RawPayout) -> Result<Payout> {
        let arrival_date = parse_timestamp(&row.arrival_date, &self.payout_format.timestamp_format)
            .with_context(|| format!("Bad payout arrival date at {}", row.location))?;
        let amount = Amount::parse(&row.amount, self.payout_format.convention)
            .with_context(|| format!("Bad payout amount at {}", row.location))?;

        Ok(Payout {
            id: row.id.clone(),
            arrival_date,
            amount,
            status: row.status.clone(),
        })
    }

    pub fn parse_link(&self, row: &RawLink) -> Result<PaymentPayoutLink> {
        let timestamp = parse_timestamp(&row.timestamp, &self.link_format.timestamp_format)
            .with_context(|| format!("Bad payment timestamp at {}", row.location))?;

        Ok(PaymentPayoutLink {
            payment_id: row.payment_id.clone(),
            customer_id: row.customer_id.clone(),
            timestamp,
            payout_id: row.payout_id.clone(),
            status: row.status.clone(),
            location: row.location.clone(),
        })
    }

    /// Build the index: payouts by id first, then every accepted link under three keys
    pub fn build(&self, payout_rows: &[RawPayout], link_rows: &[RawLink]) -> Result<ReconciliationIndex> {
        let mut stats = IndexStats::default();

        let mut payouts_by_id: HashMap<String, Payout> = HashMap::new();
        for row in payout_rows {
            let payout = self.parse_payout(row)?;
            if let Some(previous) = payouts_by_id.insert(payout.id.clone(), payout) {
                stats.duplicate_payout_ids += 1;
                tracing::debug!(payout_id = %previous.id, "duplicate payout id, keeping the later row");
            }
        }
        stats.payouts = payouts_by_id.len();

        let mut index = ReconciliationIndex::new(stats, self.link_format.timestamp_precision());
        for row in link_rows {
            if !self.link_format.accepted_statuses.iter().any(|s| s == &row.status) {
                index.stats.links_skipped += 1;
                continue;
            }

            let link = self.parse_link(row)?;
            let payout = payouts_by_id.get(&link.payout_id).cloned();
            if payout.is_none() {
                index.stats.unresolved_links += 1;
                tracing::warn!(
                    payout_id = %link.payout_id,
                    payment_id = %link.payment_id,
                    date = %link.timestamp,
                    "no payout found for payment"
                );
            }

            index.stats.links_indexed += 1;
            index.insert(IndexEntry { link, payout });
        }

        tracing::info!(
            payouts = index.stats.payouts,
            links = index.stats.links_indexed,
            unresolved = index.stats.unresolved_links,
            "built payout index"
        );
        Ok(index)
    }
}

// ============================================================================
// TESTS
// ============================================================================
