// Payout Reconciliation - Core Library
// Exposes all modules for use in the CLI and tests

pub mod amount;         // Fixed-point money, decimal conventions, VAT percent
pub mod config;         // Environment configuration
pub mod geoip;          // IP → country lookups
pub mod parser;         // CSV exports → raw rows
pub mod payment;        // Payment normalization + VAT classification
pub mod payout;         // Payout index, fuzzy minute join
pub mod pipeline;       // One batch run, stage by stage
pub mod reconciliation; // Channel reports + period filter
pub mod report;         // CSV report files
pub mod schema;         // Export layouts as data
pub mod temporal;       // Timestamps + report dates

// Re-export commonly used types
pub use amount::{vat_percent_of, Amount, AmountError, DecimalConvention};
pub use config::{Config, ConfigError};
pub use geoip::{CountryResolver, OfflineCountryResolver, ResolveError, StaticCountryResolver};
#[cfg(feature = "geoip")]
pub use geoip::HttpCountryResolver;
pub use parser::{ExportParser, ExportTable, RawLink, RawPayment, RawPayout, SourceLocation};
pub use payment::{Channel, CountryOverride, CustomerKind, Payment, PaymentNormalizer};
pub use payout::{
    IndexStats, MatchOutcome, PaymentPayoutLink, Payout, PayoutIndexBuilder,
    ReconciliationIndex, ReconciliationKey, FUZZ_WINDOW_SECONDS,
};
pub use pipeline::{Pipeline, RunSummary, REPORT_CHANNELS};
pub use reconciliation::{
    ChannelReport, Discrepancy, DiscrepancyCategory, PeriodError, PeriodFilter,
    ReconciliationEngine,
};
pub use schema::{Column, EuPolicy, ExportLayout, LayoutError, LinkFormat, PaymentFormat, PayoutFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
