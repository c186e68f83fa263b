use serde::{Deserialize, Serialize};

use crate::{AdapterId, ProviderId};

/// A provider plus the set of adapters loopback DNS should be applied to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub provider_id: ProviderId,
    pub adapter_ids: Vec<AdapterId>,
}
