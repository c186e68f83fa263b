use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ProviderId;

/// A named upstream DNS provider: either classical UDP/TCP or DNS-over-HTTPS.
///
/// See §3 "Provider" for the invariants this type must uphold; [`Provider::validate`]
/// enforces them at the point a provider enters the settings document (upsert),
/// not on every deserialization, since the control surface may legitimately
/// construct one field-by-field before it's complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_built_in: bool,
    #[serde(flatten)]
    pub kind: ProviderKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderKind {
    Standard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_ipv4: Option<Ipv4Addr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secondary_ipv4: Option<Ipv4Addr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_ipv6: Option<Ipv6Addr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secondary_ipv6: Option<Ipv6Addr>,
    },
    #[serde(rename = "DoH")]
    Doh {
        url: Url,
        #[serde(default)]
        bootstrap_ips: Vec<IpAddr>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidProvider {
    #[error("Standard provider `{0}` has no IPv4 or IPv6 address")]
    NoAddress(String),
    #[error("DoH provider `{0}` URL must use https")]
    NotHttps(String),
}

impl Provider {
    /// Enforces the invariants from §3: a Standard provider has at least one
    /// address, a DoH provider's URL is `https://`.
    pub fn validate(&self) -> Result<(), InvalidProvider> {
        match &self.kind {
            ProviderKind::Standard {
                primary_ipv4,
                secondary_ipv4,
                primary_ipv6,
                secondary_ipv6,
            } => {
                if primary_ipv4.is_none()
                    && secondary_ipv4.is_none()
                    && primary_ipv6.is_none()
                    && secondary_ipv6.is_none()
                {
                    return Err(InvalidProvider::NoAddress(self.name.clone()));
                }
            }
            ProviderKind::Doh { url, .. } => {
                if url.scheme() != "https" {
                    return Err(InvalidProvider::NotHttps(self.name.clone()));
                }
            }
        }

        Ok(())
    }

    /// The fixed attempt order for a Standard provider, per §4.4: primary v4,
    /// secondary v4, primary v6, secondary v6, skipping empties.
    pub fn standard_addresses_in_order(&self) -> Vec<IpAddr> {
        let ProviderKind::Standard {
            primary_ipv4,
            secondary_ipv4,
            primary_ipv6,
            secondary_ipv6,
        } = &self.kind
        else {
            return Vec::new();
        };

        [
            primary_ipv4.map(IpAddr::V4),
            secondary_ipv4.map(IpAddr::V4),
            primary_ipv6.map(IpAddr::V6),
            secondary_ipv6.map(IpAddr::V6),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn is_doh(&self) -> bool {
        matches!(self.kind, ProviderKind::Doh { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doh(url: &str) -> Provider {
        Provider {
            id: ProviderId::random(),
            name: "Test".into(),
            description: None,
            is_built_in: false,
            kind: ProviderKind::Doh {
                url: Url::parse(url).unwrap(),
                bootstrap_ips: vec![],
            },
        }
    }

    #[test]
    fn standard_provider_needs_an_address() {
        let provider = Provider {
            id: ProviderId::random(),
            name: "Empty".into(),
            description: None,
            is_built_in: false,
            kind: ProviderKind::Standard {
                primary_ipv4: None,
                secondary_ipv4: None,
                primary_ipv6: None,
                secondary_ipv6: None,
            },
        };

        assert_eq!(
            provider.validate(),
            Err(InvalidProvider::NoAddress("Empty".into()))
        );
    }

    #[test]
    fn doh_provider_rejects_non_https() {
        assert!(doh("http://example.com/dns-query").validate().is_err());
        assert!(doh("https://example.com/dns-query").validate().is_ok());
    }

    #[test]
    fn standard_address_order_skips_empties() {
        let provider = Provider {
            id: ProviderId::random(),
            name: "Partial".into(),
            description: None,
            is_built_in: false,
            kind: ProviderKind::Standard {
                primary_ipv4: None,
                secondary_ipv4: Some(Ipv4Addr::new(1, 1, 1, 1)),
                primary_ipv6: Some(Ipv6Addr::LOCALHOST),
                secondary_ipv6: None,
            },
        };

        assert_eq!(
            provider.standard_addresses_in_order(),
            vec![
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ]
        );
    }
}
