//! The shipped provider catalogue (§4.2 seeding rule, Glossary "Built-in provider").
//!
//! IDs are fixed so that a provider created on one machine refers to the same
//! preset everywhere; they must never change once released.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::{Provider, ProviderId, ProviderKind};

macro_rules! builtin_id {
    ($v:expr) => {
        ProviderId::from_u128($v)
    };
}

pub fn builtin_providers() -> Vec<Provider> {
    vec![
        standard(
            builtin_id!(0x0001),
            "Cloudflare",
            Some(Ipv4Addr::new(1, 1, 1, 1)),
            Some(Ipv4Addr::new(1, 0, 0, 1)),
            Some(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
            Some(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1001)),
        ),
        doh(
            builtin_id!(0x0002),
            "Cloudflare (DoH)",
            "https://cloudflare-dns.com/dns-query",
            vec![Ipv4Addr::new(1, 1, 1, 1).into(), Ipv4Addr::new(1, 0, 0, 1).into()],
        ),
        standard(
            builtin_id!(0x0003),
            "Google",
            Some(Ipv4Addr::new(8, 8, 8, 8)),
            Some(Ipv4Addr::new(8, 8, 4, 4)),
            Some(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
            Some(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8844)),
        ),
        doh(
            builtin_id!(0x0004),
            "Google (DoH)",
            "https://dns.google/dns-query",
            vec![Ipv4Addr::new(8, 8, 8, 8).into(), Ipv4Addr::new(8, 8, 4, 4).into()],
        ),
        standard(
            builtin_id!(0x0005),
            "Quad9",
            Some(Ipv4Addr::new(9, 9, 9, 9)),
            Some(Ipv4Addr::new(149, 112, 112, 112)),
            Some(Ipv6Addr::new(0x2620, 0xfe, 0, 0, 0, 0, 0, 9)),
            None,
        ),
        doh(
            builtin_id!(0x0006),
            "Quad9 (DoH)",
            "https://dns.quad9.net/dns-query",
            vec![Ipv4Addr::new(9, 9, 9, 9).into()],
        ),
        standard(
            builtin_id!(0x0007),
            "OpenDNS",
            Some(Ipv4Addr::new(208, 67, 222, 222)),
            Some(Ipv4Addr::new(208, 67, 220, 220)),
            None,
            None,
        ),
        doh(
            builtin_id!(0x0008),
            "OpenDNS (DoH)",
            "https://doh.opendns.com/dns-query",
            vec![Ipv4Addr::new(208, 67, 222, 222).into()],
        ),
        standard(
            builtin_id!(0x0009),
            "AdGuard",
            Some(Ipv4Addr::new(94, 140, 14, 14)),
            Some(Ipv4Addr::new(94, 140, 15, 15)),
            None,
            None,
        ),
        doh(
            builtin_id!(0x000A),
            "AdGuard (DoH)",
            "https://dns.adguard-dns.com/dns-query",
            vec![Ipv4Addr::new(94, 140, 14, 14).into()],
        ),
    ]
}

fn standard(
    id: ProviderId,
    name: &str,
    primary_ipv4: Option<Ipv4Addr>,
    secondary_ipv4: Option<Ipv4Addr>,
    primary_ipv6: Option<Ipv6Addr>,
    secondary_ipv6: Option<Ipv6Addr>,
) -> Provider {
    Provider {
        id,
        name: name.to_string(),
        description: None,
        is_built_in: true,
        kind: ProviderKind::Standard {
            primary_ipv4,
            secondary_ipv4,
            primary_ipv6,
            secondary_ipv6,
        },
    }
}

fn doh(id: ProviderId, name: &str, url: &str, bootstrap_ips: Vec<std::net::IpAddr>) -> Provider {
    Provider {
        id,
        name: name.to_string(),
        description: None,
        is_built_in: true,
        kind: ProviderKind::Doh {
            url: Url::parse(url).expect("built-in DoH URLs are well-formed"),
            bootstrap_ips,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_provider_is_valid() {
        for provider in builtin_providers() {
            provider.validate().unwrap_or_else(|e| {
                panic!("built-in provider `{}` failed validation: {e}", provider.name)
            });
        }
    }

    #[test]
    fn builtin_ids_are_unique() {
        let providers = builtin_providers();
        let mut ids: Vec<_> = providers.iter().map(|p| p.id).collect();
        let len_before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), len_before);
    }
}
