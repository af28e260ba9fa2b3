// 🌍 Country Resolver - IP geolocation boundary
// Used only when the VAT rate was ambiguous at capture time

use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Default lookup endpoint, `{ip}` is substituted per request
pub const DEFAULT_GEOIP_URL: &str = "https://ipinfo.io/{ip}/json";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[cfg(feature = "geoip")]
    #[error("country lookup for {ip} failed: {source}")]
    Http {
        ip: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("country lookup for {ip} returned no country code")]
    MissingCountry { ip: String },

    #[error("no country resolver available to look up {ip}")]
    Unavailable { ip: String },

    #[error("`{ip}` is not an IP address")]
    InvalidIp { ip: String },
}

/// Parse an address before it reaches a lookup. An empty path segment makes
/// ipinfo-style services answer with the caller's own location.
pub fn parse_ip(ip_address: &str) -> Result<IpAddr, ResolveError> {
    ip_address.trim().parse().map_err(|_| ResolveError::InvalidIp {
        ip: ip_address.to_string(),
    })
}

/// CountryResolver - resolve a two-letter country code from an IP address
///
/// Implementations block until they have an answer. There is no retry: any
/// error aborts the run.
pub trait CountryResolver {
    fn resolve(&self, ip_address: &str) -> Result<String, ResolveError>;
}

// ============================================================================
// HTTP RESOLVER
// ============================================================================

#[cfg(feature = "geoip")]
#[derive(Debug, serde::Deserialize)]
struct GeoIpInfo {
    country: Option<String>,
}

/// Looks countries up over HTTP (ipinfo.io compatible JSON)
#[cfg(feature = "geoip")]
pub struct HttpCountryResolver {
    client: reqwest::blocking::Client,
    url_template: String,
}

#[cfg(feature = "geoip")]
impl HttpCountryResolver {
    pub fn new(url_template: impl Into<String>) -> Self {
        HttpCountryResolver {
            client: reqwest::blocking::Client::new(),
            url_template: url_template.into(),
        }
    }

    fn url_for(&self, ip_address: &str) -> String {
        self.url_template.replace("{ip}", ip_address)
    }
}

#[cfg(feature = "geoip")]
impl CountryResolver for HttpCountryResolver {
    fn resolve(&self, ip_address: &str) -> Result<String, ResolveError> {
        let ip = parse_ip(ip_address)?.to_string();
        let ip_address = ip.as_str();
        let http_error = |source| ResolveError::Http {
            ip: ip_address.to_string(),
            source,
        };

        let info: GeoIpInfo = self
            .client
            .get(self.url_for(ip_address))
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(http_error)?;

        let country = info
            .country
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ResolveError::MissingCountry {
                ip: ip_address.to_string(),
            })?;

        tracing::debug!(ip = ip_address, country = %country, "resolved country from IP address");
        Ok(country)
    }
}

// ============================================================================
// OFFLINE RESOLVERS
// ============================================================================

/// Fixed IP → country table. Unknown addresses are an error.
#[derive(Debug, Clone, Default)]
pub struct StaticCountryResolver {
    countries: HashMap<String, String>,
}

impl StaticCountryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip_address: &str, country: &str) -> Self {
        self.countries
            .insert(ip_address.to_string(), country.to_string());
        self
    }
}

impl CountryResolver for StaticCountryResolver {
    fn resolve(&self, ip_address: &str) -> Result<String, ResolveError> {
        self.countries
            .get(ip_address)
            .cloned()
            .ok_or_else(|| ResolveError::MissingCountry {
                ip: ip_address.to_string(),
            })
    }
}

/// Resolver for builds without the `geoip` feature: every lookup fails
pub struct OfflineCountryResolver;

impl CountryResolver for OfflineCountryResolver {
    fn resolve(&self, ip_address: &str) -> Result<String, ResolveError> {
        Err(ResolveError::Unavailable {
            ip: ip_address.to_string(),
        })
    }
}
