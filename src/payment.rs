// 🧾 Payment Normalizer - raw export row → classified Payment
// EU / private / refund classification with the IP geolocation fallback

use crate::amount::Amount;
use crate::geoip::{parse_ip, CountryResolver};
use crate::parser::{RawPayment, SourceLocation};
use crate::schema::{EuPolicy, PaymentFormat};
use crate::temporal::parse_timestamp;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Channel - which processor settled the payment, and so which report it lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Primary card processor, paid out in batches
    Card,
    /// Alternate wallet processor, no payout data
    Wallet,
}

impl Channel {
    pub fn name(&self) -> &str {
        match self {
            Channel::Card => "Stripe",
            Channel::Wallet => "PayPal",
        }
    }

    /// Whether a payment needs a matched payout to appear in this channel's report
    pub fn requires_payout(&self) -> bool {
        matches!(self, Channel::Card)
    }
}

/// Private vs business is only meaningful for EU sales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerKind {
    Private,
    Business,
    NotApplicable,
}

impl CustomerKind {
    pub fn classify(is_eu: bool, tax_number: &str) -> Self {
        match (is_eu, tax_number.is_empty()) {
            (false, _) => CustomerKind::NotApplicable,
            (true, true) => CustomerKind::Private,
            (true, false) => CustomerKind::Business,
        }
    }

    /// Report cell: "x" private, "" business, "-" outside the EU
    pub fn marker(&self) -> &'static str {
        match self {
            CustomerKind::Private => "x",
            CustomerKind::Business => "",
            CustomerKind::NotApplicable => "-",
        }
    }
}

/// Billing country replaced by the country resolved from the customer's IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryOverride {
    pub billing_country: String,
    pub resolved_country: String,
}

/// Payment - one normalized, classified transaction. Never mutated after normalize().
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub channel: Option<Channel>,
    pub transaction_id: Option<String>,
    pub timestamp: NaiveDateTime,
    /// Email, or the display name when the export has no email
    pub customer_id: String,
    pub customer_name: String,
    /// VAT-inclusive gross
    pub amount: Amount,
    pub tax_amount: Amount,
    pub is_eu: bool,
    pub customer_kind: CustomerKind,
    pub is_refund: bool,
    pub country_code: String,
    pub tax_number: String,
    pub country_override: Option<CountryOverride>,
    pub location: Option<SourceLocation>,
}

impl Payment {
    pub fn is_private(&self) -> bool {
        self.customer_kind == CustomerKind::Private
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct PaymentNormalizer<'a> {
    format: &'a PaymentFormat,
    resolver: &'a dyn CountryResolver,
}

impl<'a> PaymentNormalizer<'a> {
    pub fn new(format: &'a PaymentFormat, resolver: &'a dyn CountryResolver) -> Self {
        PaymentNormalizer { format, resolver }
    }

    /// Normalize every row, keeping input order. Stops at the first fatal row.
    pub fn normalize_all(&self, rows: &[RawPayment]) -> Result<Vec<Payment>> {
        let mut payments = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;

        for row in rows {
            let normalized = self.normalize(row).with_context(|| match &row.location {
                Some(location) => format!("Failed to normalize payment at {}", location),
                None => "Failed to normalize payment".to_string(),
            })?;

            match normalized {
                Some(payment) => payments.push(payment),
                None => skipped += 1,
            }
        }

        tracing::info!(
            format = %self.format.name,
            accepted = payments.len(),
            skipped,
            "normalized payment export"
        );
        Ok(payments)
    }

    /// Normalize one row. `Ok(None)` means the status is not reportable.
    pub fn normalize(&self, row: &RawPayment) -> Result<Option<Payment>> {
        let format = self.format;

        if !format.accepted_statuses.iter().any(|s| s == &row.status) {
            tracing::trace!(status = %row.status, "skipping payment with unreported status");
            return Ok(None);
        }

        let timestamp = parse_timestamp(&row.timestamp, &format.timestamp_format)?;
        let amount = Amount::parse(&row.amount, format.convention)?;
        let tax_amount = if row.tax.is_empty() {
            Amount::ABSENT
        } else {
            Amount::parse(&row.tax, format.convention)?
        };

        let customer_name = display_name(&row.first_name, &row.last_name);
        let customer_id = if row.email.is_empty() {
            customer_name.clone()
        } else {
            row.email.clone()
        };

        let mut tax_number = row.tax_number.trim().to_uppercase();
        let mut country_code = row.country_code.trim().to_uppercase();
        if country_code.is_empty() {
            country_code = infer_country(&tax_number, &format.default_country);
        }
        if format.prefix_tax_number && !tax_number.is_empty() && !tax_number.starts_with(&country_code) {
            tax_number = format!("{}{}", country_code, tax_number);
        }

        let is_eu = match format.eu_policy {
            EuPolicy::TaxEvidence => !tax_amount.is_absent() || !tax_number.is_empty(),
            EuPolicy::DeclaredVatRate => {
                !row.vat_rate.is_empty() && row.vat_rate != format.unknown_vat_marker
            }
        };

        // VAT was collected without a known rate: trust the IP over the billing address
        let mut country_override = None;
        if row.vat_rate == format.unknown_vat_marker && !tax_amount.is_absent() {
            let lookup_failed = || format!("Country lookup failed for payment of {} at {}", customer_id, timestamp);
            let ip = parse_ip(&row.ip_address).with_context(lookup_failed)?;
            let resolved = self
                .resolver
                .resolve(&ip.to_string())
                .with_context(lookup_failed)?;

            if resolved != country_code {
                tracing::warn!(
                    customer = %customer_id,
                    %timestamp,
                    ip = %row.ip_address,
                    billing_country = %country_code,
                    resolved_country = %resolved,
                    "country_override: billing country replaced by IP country"
                );
                country_override = Some(CountryOverride {
                    billing_country: country_code.clone(),
                    resolved_country: resolved.clone(),
                });
                country_code = resolved;
            }
        }

        let transaction_id = Some(row.transaction_id.clone()).filter(|id| !id.is_empty());

        Ok(Some(Payment {
            channel: format.channel_for(&row.payment_method),
            transaction_id,
            timestamp,
            customer_id,
            customer_name,
            amount,
            tax_amount,
            is_eu,
            customer_kind: CustomerKind::classify(is_eu, &tax_number),
            is_refund: row.status == format.refund_status,
            country_code,
            tax_number,
            country_override,
            location: row.location.clone(),
        }))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Country from a tax number's alphabetic prefix ("ATU123" → "AT"), else the default
fn infer_country(tax_number: &str, default_country: &str) -> String {
    let prefix: String = tax_number.chars().take(2).collect();
    if prefix.len() == 2 && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        prefix
    } else {
        default_country.to_uppercase()
    }
}

/// "aDA", "LOVELACE" → "Ada Lovelace"; no trailing space without a last name
pub fn display_name(first_name: &str, last_name: &str) -> String {
    let first = title_case(first_name);
    let last = title_case(last_name);

    match (first.is_empty(), last.is_empty()) {
        (_, true) => first,
        (true, false) => last,
        (false, false) => format!("{} {}", first, last),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.split('-')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::{OfflineCountryResolver, ResolveError, StaticCountryResolver};

    fn shop_row(status: &str, method: &str, tax: &str, tax_number: &str, vat_rate: &str) -> RawPayment {
        RawPayment {
            status: status.to_string(),
            timestamp: "2024-02-14 09:30:12".to_string(),
            amount: "119.00".to_string(),
            first_name: "aDA".to_string(),
            last_name: "LOVELACE".to_string(),
            payment_method: method.to_string(),
            email: "ada@example.com".to_string(),
            tax: tax.to_string(),
            country_code: "DE".to_string(),
            tax_number: tax_number.to_string(),
            vat_rate: vat_rate.to_string(),
            ip_address: "203.0.113.7".to_string(),
            ..RawPayment::default()
        }
    }

    #[test]
    fn test_unaccepted_status_is_skipped() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let result = normalizer
            .normalize(&shop_row("pending", "Stripe", "19.00", "", "19"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_private_eu_customer() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let payment = normalizer
            .normalize(&shop_row("complete", "Stripe", "19.00", "", "19"))
            .unwrap()
            .unwrap();

        assert_eq!(payment.channel, Some(Channel::Card));
        assert_eq!(payment.customer_name, "Ada Lovelace");
        assert_eq!(payment.customer_id, "ada@example.com");
        assert!(payment.is_eu);
        assert!(payment.is_private());
        assert_eq!(payment.customer_kind.marker(), "x");
        assert!(!payment.is_refund);
        assert_eq!(payment.amount, Amount::new(119, 0).unwrap());
        assert_eq!(payment.tax_amount, Amount::new(19, 0).unwrap());
    }

    #[test]
    fn test_business_customer_with_tax_number_and_no_tax() {
        // Reverse charge: no tax collected, EU because a tax number is on file
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let payment = normalizer
            .normalize(&shop_row("refunded", "PayPal Standard", "0.00", "atu12345678", "0"))
            .unwrap()
            .unwrap();

        assert!(payment.is_eu);
        assert_eq!(payment.customer_kind, CustomerKind::Business);
        assert_eq!(payment.customer_kind.marker(), "");
        assert_eq!(payment.tax_number, "ATU12345678");
        assert!(payment.is_refund);
        assert_eq!(payment.channel, Some(Channel::Wallet));
    }

    #[test]
    fn test_non_eu_customer_is_not_applicable() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let mut row = shop_row("complete", "Stripe", "", "", "0");
        row.country_code = "us".to_string();
        let payment = normalizer.normalize(&row).unwrap().unwrap();

        assert!(!payment.is_eu);
        assert_eq!(payment.customer_kind, CustomerKind::NotApplicable);
        assert_eq!(payment.customer_kind.marker(), "-");
        assert_eq!(payment.country_code, "US");
        assert!(payment.tax_amount.is_absent());
    }

    #[test]
    fn test_unknown_vat_rate_overrides_billing_country() {
        let format = PaymentFormat::shop();
        let resolver = StaticCountryResolver::new().with_entry("203.0.113.7", "AT");
        let normalizer = PaymentNormalizer::new(&format, &resolver);

        let payment = normalizer
            .normalize(&shop_row("complete", "Stripe", "20.00", "", "??"))
            .unwrap()
            .unwrap();

        assert_eq!(payment.country_code, "AT");
        assert_eq!(
            payment.country_override,
            Some(CountryOverride {
                billing_country: "DE".to_string(),
                resolved_country: "AT".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_vat_rate_same_country_is_not_an_override() {
        let format = PaymentFormat::shop();
        let resolver = StaticCountryResolver::new().with_entry("203.0.113.7", "DE");
        let normalizer = PaymentNormalizer::new(&format, &resolver);

        let payment = normalizer
            .normalize(&shop_row("complete", "Stripe", "19.00", "", "??"))
            .unwrap()
            .unwrap();

        assert_eq!(payment.country_code, "DE");
        assert_eq!(payment.country_override, None);
    }

    #[test]
    fn test_unknown_vat_rate_without_tax_skips_lookup() {
        // Offline resolver would fail if called
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let payment = normalizer
            .normalize(&shop_row("complete", "Stripe", "0.00", "", "??"))
            .unwrap()
            .unwrap();
        assert_eq!(payment.country_override, None);
    }

    #[test]
    fn test_resolver_failure_is_fatal() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let result = normalizer.normalize(&shop_row("complete", "Stripe", "19.00", "", "??"));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_vat_rate_with_blank_ip_is_fatal() {
        // Would answer for "" if it were ever asked
        let format = PaymentFormat::shop();
        let resolver = StaticCountryResolver::new().with_entry("", "US");
        let normalizer = PaymentNormalizer::new(&format, &resolver);

        let mut row = shop_row("complete", "Stripe", "19.00", "", "??");
        row.ip_address = String::new();

        let err = normalizer.normalize(&row).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::InvalidIp { .. })
        ));
    }

    #[test]
    fn test_malformed_amount_and_timestamp_are_fatal() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let mut row = shop_row("complete", "Stripe", "19.00", "", "19");
        row.amount = "1.2.3".to_string();
        assert!(normalizer.normalize(&row).is_err());

        let mut row = shop_row("complete", "Stripe", "19.00", "", "19");
        row.timestamp = "yesterday".to_string();
        assert!(normalizer.normalize(&row).is_err());
    }

    #[test]
    fn test_normalize_all_reports_location() {
        let format = PaymentFormat::shop();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let mut bad = shop_row("complete", "Stripe", "19.00", "", "19");
        bad.amount = "oops".to_string();
        bad.location = Some(SourceLocation {
            source_file: "shop.csv".to_string(),
            line_number: 7,
        });

        let rows = vec![shop_row("complete", "Stripe", "19.00", "", "19"), bad];
        let err = normalizer.normalize_all(&rows).unwrap_err();
        assert!(err.to_string().contains("shop.csv line 7"), "got: {}", err);
    }

    #[test]
    fn test_declared_vat_rate_policy() {
        let format = PaymentFormat::reseller();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let row = RawPayment {
            status: "paid".to_string(),
            timestamp: "2024-02-14 09:30:12".to_string(),
            amount: "49.00".to_string(),
            first_name: "grace HOPPER".to_string(),
            vat_rate: "0".to_string(),
            tax_number: "123456789".to_string(),
            country_code: "nl".to_string(),
            ..RawPayment::default()
        };
        let payment = normalizer.normalize(&row).unwrap().unwrap();

        // Declared rate is known, so EU even with zero tax
        assert!(payment.is_eu);
        assert_eq!(payment.customer_kind, CustomerKind::Business);
        assert_eq!(payment.tax_number, "NL123456789");
        assert_eq!(payment.customer_id, "Grace Hopper");
        assert_eq!(payment.channel, Some(Channel::Wallet));

        let unknown = RawPayment {
            vat_rate: "unknown".to_string(),
            tax_number: String::new(),
            ..row
        };
        let payment = normalizer.normalize(&unknown).unwrap().unwrap();
        assert!(!payment.is_eu);
        assert_eq!(payment.customer_kind, CustomerKind::NotApplicable);
    }

    #[test]
    fn test_blank_country_is_inferred() {
        let format = PaymentFormat::reseller();
        let normalizer = PaymentNormalizer::new(&format, &OfflineCountryResolver);

        let base = RawPayment {
            status: "paid".to_string(),
            timestamp: "2024-02-14 09:30:12".to_string(),
            amount: "49.00".to_string(),
            first_name: "Grace".to_string(),
            vat_rate: "20".to_string(),
            ..RawPayment::default()
        };

        let from_tax_number = RawPayment {
            tax_number: "fr12345678901".to_string(),
            ..base.clone()
        };
        let payment = normalizer.normalize(&from_tax_number).unwrap().unwrap();
        assert_eq!(payment.country_code, "FR");
        assert_eq!(payment.tax_number, "FR12345678901");

        let numeric = RawPayment {
            tax_number: "123456789".to_string(),
            ..base
        };
        let payment = normalizer.normalize(&numeric).unwrap().unwrap();
        assert_eq!(payment.country_code, "DE");
        assert_eq!(payment.tax_number, "DE123456789");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("aDA", "LOVELACE"), "Ada Lovelace");
        assert_eq!(display_name("jean-luc", "picard"), "Jean-Luc Picard");
        assert_eq!(display_name("mary ann", ""), "Mary Ann");
        assert_eq!(display_name("  cher ", "  "), "Cher");
        assert_eq!(display_name("", "smith"), "Smith");
    }

    #[test]
    fn test_channel_properties() {
        assert!(Channel::Card.requires_payout());
        assert!(!Channel::Wallet.requires_payout());
        assert_eq!(Channel::Card.name(), "Stripe");
        assert_eq!(Channel::Wallet.name(), "PayPal");
    }
}
