// 📐 Shape Layer - Export layouts as data
// Every source-system export version is described here, not in code paths

use crate::amount::DecimalConvention;
use crate::payment::Channel;
use anyhow::{Context as AnyhowContext, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// COLUMN REFERENCES
// ============================================================================

/// A column is addressed either by position or by header name.
///
/// In JSON: `17` or `"Customer Email"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Index(usize),
    Name(String),
}

impl Column {
    pub fn named(name: &str) -> Self {
        Column::Name(name.to_string())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Index(index) => write!(f, "#{}", index),
            Column::Name(name) => write!(f, "`{}`", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("missing required column {column} in {source_file}")]
    MissingColumn { column: String, source_file: String },

    #[error("{source_file} line {line}: row has no column #{index}")]
    ShortRow {
        source_file: String,
        line: usize,
        index: usize,
    },

    #[error("column {column} is addressed by name but {source_file} has no header row")]
    NoHeaderRow { column: String, source_file: String },

    #[error("unknown payment format preset `{0}`")]
    UnknownPreset(String),
}

// ============================================================================
// CLASSIFICATION POLICY
// ============================================================================

/// How a payment export signals that a sale falls under EU VAT.
///
/// The two policies disagree on reverse-charge sales (EU business, zero tax,
/// no tax number on file), so the choice stays per export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EuPolicy {
    /// EU when tax was collected or a tax number is on file
    TaxEvidence,
    /// EU when the declared VAT rate is anything but the unknown marker
    DeclaredVatRate,
}

// ============================================================================
// PAYMENT EXPORT FORMAT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentColumns {
    pub status: Column,
    pub timestamp: Column,
    pub amount: Column,
    pub first_name: Column,
    #[serde(default)]
    pub last_name: Option<Column>,
    #[serde(default)]
    pub payment_method: Option<Column>,
    #[serde(default)]
    pub transaction_id: Option<Column>,
    #[serde(default)]
    pub email: Option<Column>,
    #[serde(default)]
    pub tax: Option<Column>,
    #[serde(default)]
    pub country_code: Option<Column>,
    #[serde(default)]
    pub tax_number: Option<Column>,
    #[serde(default)]
    pub vat_rate: Option<Column>,
    #[serde(default)]
    pub ip_address: Option<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFormat {
    pub name: String,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    pub convention: DecimalConvention,
    pub timestamp_format: String,
    pub accepted_statuses: Vec<String>,
    #[serde(default = "default_refund_status")]
    pub refund_status: String,
    pub eu_policy: EuPolicy,
    #[serde(default = "default_unknown_vat_marker")]
    pub unknown_vat_marker: String,
    #[serde(default = "default_country")]
    pub default_country: String,
    #[serde(default)]
    pub prefix_tax_number: bool,
    /// Payment method value → report channel
    #[serde(default)]
    pub channels: HashMap<String, Channel>,
    /// Channel for payment methods missing from `channels`
    #[serde(default)]
    pub default_channel: Option<Channel>,
    pub columns: PaymentColumns,
}

fn default_true() -> bool {
    true
}

fn default_refund_status() -> String {
    "refunded".to_string()
}

fn default_unknown_vat_marker() -> String {
    "??".to_string()
}

fn default_country() -> String {
    "DE".to_string()
}

impl PaymentFormat {
    /// Shop payment export: fixed column positions behind a header row
    pub fn shop() -> Self {
        let mut channels = HashMap::new();
        channels.insert("Stripe".to_string(), Channel::Card);
        channels.insert("PayPal Standard".to_string(), Channel::Wallet);

        PaymentFormat {
            name: "shop".to_string(),
            has_headers: true,
            convention: DecimalConvention::DotDecimal,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            accepted_statuses: vec![
                "complete".to_string(),
                "refunded".to_string(),
                "edd_subscription".to_string(),
            ],
            refund_status: default_refund_status(),
            eu_policy: EuPolicy::TaxEvidence,
            unknown_vat_marker: default_unknown_vat_marker(),
            default_country: default_country(),
            prefix_tax_number: false,
            channels,
            default_channel: None,
            columns: PaymentColumns {
                status: Column::Index(25),
                timestamp: Column::Index(20),
                amount: Column::Index(14),
                first_name: Column::Index(4),
                last_name: Some(Column::Index(5)),
                payment_method: Some(Column::Index(17)),
                transaction_id: None,
                email: Some(Column::Index(2)),
                tax: Some(Column::Index(15)),
                country_code: Some(Column::Index(10)),
                tax_number: Some(Column::Index(28)),
                vat_rate: Some(Column::Index(30)),
                ip_address: Some(Column::Index(27)),
            },
        }
    }

    /// Reseller export: named columns, no itemized tax, declared VAT rate only
    pub fn reseller() -> Self {
        PaymentFormat {
            name: "reseller".to_string(),
            has_headers: true,
            convention: DecimalConvention::DotDecimal,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            accepted_statuses: vec!["paid".to_string(), "refunded".to_string()],
            refund_status: default_refund_status(),
            eu_policy: EuPolicy::DeclaredVatRate,
            unknown_vat_marker: "unknown".to_string(),
            default_country: default_country(),
            prefix_tax_number: true,
            channels: HashMap::new(),
            default_channel: Some(Channel::Wallet),
            columns: PaymentColumns {
                status: Column::named("Status"),
                timestamp: Column::named("Order Date"),
                amount: Column::named("Total"),
                first_name: Column::named("Customer Name"),
                last_name: None,
                payment_method: None,
                transaction_id: Some(Column::named("Order ID")),
                email: None,
                tax: None,
                country_code: Some(Column::named("Country")),
                tax_number: Some(Column::named("VAT ID")),
                vat_rate: Some(Column::named("VAT Rate")),
                ip_address: None,
            },
        }
    }

    pub fn preset(name: &str) -> Result<Self, LayoutError> {
        match name {
            "shop" => Ok(Self::shop()),
            "reseller" => Ok(Self::reseller()),
            other => Err(LayoutError::UnknownPreset(other.to_string())),
        }
    }

    pub fn channel_for(&self, payment_method: &str) -> Option<Channel> {
        self.channels
            .get(payment_method)
            .copied()
            .or(self.default_channel)
    }
}

// ============================================================================
// PAYOUT + LINK EXPORT FORMATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutColumns {
    pub id: Column,
    pub arrival_date: Column,
    pub amount: Column,
    pub status: Column,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutFormat {
    #[serde(default = "default_true")]
    pub has_headers: bool,
    pub convention: DecimalConvention,
    pub timestamp_format: String,
    pub columns: PayoutColumns,
}

impl Default for PayoutFormat {
    fn default() -> Self {
        PayoutFormat {
            has_headers: true,
            convention: DecimalConvention::CommaDecimal,
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
            columns: PayoutColumns {
                id: Column::named("id"),
                arrival_date: Column::named("Arrival Date (UTC)"),
                amount: Column::named("Amount"),
                status: Column::named("Status"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkColumns {
    pub payment_id: Column,
    pub customer_id: Column,
    pub timestamp: Column,
    pub payout_id: Column,
    pub status: Column,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkFormat {
    #[serde(default = "default_true")]
    pub has_headers: bool,
    pub timestamp_format: String,
    pub accepted_statuses: Vec<String>,
    pub columns: LinkColumns,
}

impl Default for LinkFormat {
    fn default() -> Self {
        LinkFormat {
            has_headers: true,
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
            accepted_statuses: vec!["Paid".to_string(), "Refunded".to_string()],
            columns: LinkColumns {
                payment_id: Column::named("id"),
                customer_id: Column::named("Customer Email"),
                timestamp: Column::named("Created (UTC)"),
                payout_id: Column::named("Transfer"),
                status: Column::named("Status"),
            },
        }
    }
}

impl LinkFormat {
    /// Smallest step the timestamp format can express: one second with `%S`/`%T`, else one minute
    pub fn timestamp_precision(&self) -> Duration {
        if ["%S", "%T", "%X", "%s"].iter().any(|spec| self.timestamp_format.contains(spec)) {
            Duration::seconds(1)
        } else {
            Duration::minutes(1)
        }
    }
}

// ============================================================================
// EXPORT LAYOUT
// ============================================================================

/// A payment format given inline or by preset name (`"shop"`, `"reseller"`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaymentFormatSpec {
    Preset(String),
    Inline(Box<PaymentFormat>),
}

impl PaymentFormatSpec {
    pub fn resolve(&self) -> Result<PaymentFormat, LayoutError> {
        match self {
            PaymentFormatSpec::Preset(name) => PaymentFormat::preset(name),
            PaymentFormatSpec::Inline(format) => Ok((**format).clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentExport {
    pub file: PathBuf,
    pub format: PaymentFormatSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutExport {
    pub file: PathBuf,
    #[serde(default)]
    pub format: PayoutFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkExport {
    pub file: PathBuf,
    #[serde(default)]
    pub format: LinkFormat,
}

/// Which files to read and how. File paths are relative to the input directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLayout {
    pub payment_exports: Vec<PaymentExport>,
    pub payout_export: PayoutExport,
    pub link_export: LinkExport,
}

impl Default for ExportLayout {
    fn default() -> Self {
        ExportLayout {
            payment_exports: vec![PaymentExport {
                file: PathBuf::from("edd-export-payments.csv"),
                format: PaymentFormatSpec::Preset("shop".to_string()),
            }],
            payout_export: PayoutExport {
                file: PathBuf::from("payouts.csv"),
                format: PayoutFormat::default(),
            },
            link_export: LinkExport {
                file: PathBuf::from("payments.csv"),
                format: LinkFormat::default(),
            },
        }
    }
}

impl ExportLayout {
    /// Load a layout from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read layout file: {:?}", path.as_ref()))?;

        let layout: ExportLayout =
            serde_json::from_str(&content).context("Failed to parse layout JSON")?;

        // Surface unknown presets before any input is read
        for export in &layout.payment_exports {
            export.format.resolve()?;
        }

        Ok(layout)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_timestamp_precision_follows_format() {
        assert_eq!(LinkFormat::default().timestamp_precision(), Duration::minutes(1));

        let precise = LinkFormat {
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            ..LinkFormat::default()
        };
        assert_eq!(precise.timestamp_precision(), Duration::seconds(1));
    }

    #[test]
    fn test_column_json_forms() {
        let index: Column = serde_json::from_str("17").unwrap();
        let name: Column = serde_json::from_str("\"Customer Email\"").unwrap();

        assert_eq!(index, Column::Index(17));
        assert_eq!(name, Column::named("Customer Email"));
        assert_eq!(index.to_string(), "#17");
    }

    #[test]
    fn test_shop_channels() {
        let format = PaymentFormat::shop();
        assert_eq!(format.channel_for("Stripe"), Some(Channel::Card));
        assert_eq!(format.channel_for("PayPal Standard"), Some(Channel::Wallet));
        assert_eq!(format.channel_for("Manual"), None);
    }

    #[test]
    fn test_reseller_default_channel() {
        let format = PaymentFormat::reseller();
        assert_eq!(format.channel_for("anything"), Some(Channel::Wallet));
        assert_eq!(format.eu_policy, EuPolicy::DeclaredVatRate);
        assert!(format.prefix_tax_number);
    }

    #[test]
    fn test_unknown_preset() {
        assert_eq!(
            PaymentFormat::preset("legacy"),
            Err(LayoutError::UnknownPreset("legacy".to_string()))
        );
    }

    #[test]
    fn test_layout_json_with_presets_and_defaults() {
        let json = r#"{
            "payment_exports": [
                { "file": "shop.csv", "format": "shop" },
                { "file": "reseller.csv", "format": "reseller" }
            ],
            "payout_export": { "file": "payouts.csv" },
            "link_export": { "file": "payments.csv" }
        }"#;

        let layout: ExportLayout = serde_json::from_str(json).unwrap();

        assert_eq!(layout.payment_exports.len(), 2);
        assert_eq!(
            layout.payment_exports[1].format.resolve().unwrap().name,
            "reseller"
        );
        assert_eq!(layout.payout_export.format, PayoutFormat::default());
        assert_eq!(layout.link_export.format.accepted_statuses, vec!["Paid", "Refunded"]);
    }

    #[test]
    fn test_layout_json_inline_format() {
        let json = r#"{
            "payment_exports": [{
                "file": "v3.csv",
                "format": {
                    "name": "shop-v3",
                    "convention": "comma_decimal",
                    "timestamp_format": "%d.%m.%Y %H:%M",
                    "accepted_statuses": ["complete"],
                    "eu_policy": "declared_vat_rate",
                    "channels": { "Stripe": "card" },
                    "columns": {
                        "status": "State",
                        "timestamp": "Date",
                        "amount": 3,
                        "first_name": "Name",
                        "payment_method": "Gateway"
                    }
                }
            }],
            "payout_export": { "file": "payouts.csv" },
            "link_export": { "file": "payments.csv" }
        }"#;

        let layout: ExportLayout = serde_json::from_str(json).unwrap();
        let format = layout.payment_exports[0].format.resolve().unwrap();

        assert_eq!(format.name, "shop-v3");
        assert_eq!(format.convention, DecimalConvention::CommaDecimal);
        assert_eq!(format.refund_status, "refunded");
        assert_eq!(format.unknown_vat_marker, "??");
        assert_eq!(format.default_country, "DE");
        assert_eq!(format.columns.amount, Column::Index(3));
        assert_eq!(format.columns.tax, None);
        assert_eq!(format.channel_for("Stripe"), Some(Channel::Card));
    }

    #[test]
    fn test_default_layout_files() {
        let layout = ExportLayout::default();
        assert_eq!(layout.payment_exports[0].file, PathBuf::from("edd-export-payments.csv"));
        assert_eq!(layout.payout_export.file, PathBuf::from("payouts.csv"));
        assert_eq!(layout.link_export.file, PathBuf::from("payments.csv"));
    }
}
