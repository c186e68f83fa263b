use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AdapterId;

/// A snapshot of one adapter's DNS configuration, captured before loopback
/// takeover so it can be restored byte-for-byte later (§3, §4.3, T3/R2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterBackup {
    pub adapter_id: AdapterId,
    pub interface_index: u32,
    pub name: String,
    pub ipv4_dns: Vec<Ipv4Addr>,
    pub ipv6_dns: Vec<Ipv6Addr>,
    /// True if the adapter's original DNS list was inherited from DHCP rather
    /// than set explicitly; restoring a DHCP adapter means reverting to DHCP,
    /// not re-writing a static list (§4.3).
    pub dhcp: bool,
    pub captured_at: DateTime<Utc>,
}
