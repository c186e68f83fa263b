//! The tagged-union request/response vocabulary exposed over the IPC
//! endpoint (§4.8, §6). Every message carries a `messageId` so a client can
//! match a response to the request that produced it (T6); the `$type`
//! discriminator is produced via `#[serde(tag = "$type")]`.

use chrono::{DateTime, Utc};
use model::{AppSettings, ConnectionStatus, Profile, ProviderId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn reply<U>(&self, body: U) -> Envelope<U> {
        Envelope {
            message_id: self.message_id,
            timestamp: Utc::now(),
            body,
        }
    }
}

pub type ClientMsg = Envelope<ClientRequest>;
pub type ServerMsg = Envelope<ServerResponse>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    GetStatus,
    GetConfig,
    SaveConfig { settings: AppSettings },
    GetAdapters { connected_only: bool },
    ApplyProfile { profile: Profile, enable: bool },
    ConnectTemporary { provider_id: ProviderId },
    RevertToDefault,
    Disable { restore_original_dns: bool },
    TestProvider { provider_id: ProviderId, test_domain: String },
    FlushDnsCache,
    /// Catches any `$type` this build doesn't recognize (§4.8: "unknown
    /// verbs get no response, connection kept alive") — distinct from a
    /// framing violation, which is unparseable JSON or an oversized frame.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerResponse {
    Status {
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_provider_id: Option<ProviderId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_provider_name: Option<String>,
        is_temporary: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_health_check: Option<DateTime<Utc>>,
        queries_handled: u64,
    },
    Config {
        settings: AppSettings,
    },
    Adapters {
        adapters: Vec<AdapterSummary>,
    },
    Ack,
    TestResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    /// Pushed to every connected client outside the request/response flow
    /// whenever C6/C2 observe a change (§4.8 "notifications").
    StatusChanged {
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_provider_id: Option<ProviderId>,
    },
    ConfigChanged,
}

/// Wire shape of one adapter in a `GetAdapters` response; deliberately a
/// separate type from [`bin_shared::HostAdapter`] since the wire format
/// exposes only what a control surface needs to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSummary {
    pub id: String,
    pub name: String,
    pub is_connected: bool,
    pub is_eligible: bool,
}

impl From<&bin_shared::HostAdapter> for AdapterSummary {
    fn from(a: &bin_shared::HostAdapter) -> Self {
        Self {
            id: a.id.as_str().to_owned(),
            name: a.name.clone(),
            is_connected: a.is_connected,
            is_eligible: a.is_eligible_by_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_type_deserializes_to_unknown() {
        let json = r#"{"$type":"someFutureVerb","messageId":"2e4f6d9a-1f1a-4c1e-9b0a-7f7d9c9a0001","timestamp":"2026-01-01T00:00:00Z"}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        assert!(matches!(msg.body, ClientRequest::Unknown));
    }

    #[test]
    fn known_verbs_round_trip_through_json() {
        let request = ClientMsg::new(ClientRequest::GetAdapters { connected_only: true });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""$type":"getAdapters""#));
        assert!(json.contains(r#""connectedOnly":true"#));

        let round_tripped: ClientMsg = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            round_tripped.body,
            ClientRequest::GetAdapters { connected_only: true }
        ));
        assert_eq!(round_tripped.message_id, request.message_id);
    }

    #[test]
    fn reply_keeps_the_request_message_id() {
        let request = ClientMsg::new(ClientRequest::GetStatus);
        let response = request.reply(ServerResponse::Ack);
        assert_eq!(response.message_id, request.message_id);
    }
}
