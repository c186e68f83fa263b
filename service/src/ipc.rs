//! Length-prefixed IPC server (§4.8, C8): dispatches `ClientRequest` verbs to
//! C2 (Settings), C3 (Adapter controller) and C6 (Control state machine), and
//! relays notifications pushed from elsewhere in the process to every
//! connected client.
//!
//! Framing wraps `LengthDelimitedCodec` in typed `Decoder<D>`/`Encoder<E>`
//! adapters, configured little-endian with a 4-byte length field and a
//! 1 MiB cap to match the external interface named in §6.

use std::sync::Arc;

use anyhow::{Context as _, ErrorExt as _, Result};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[cfg(unix)]
#[path = "ipc/unix.rs"]
mod platform;
#[cfg(windows)]
#[path = "ipc/windows.rs"]
mod platform;

mod messages;

pub use messages::{AdapterSummary, ClientMsg, ClientRequest, ServerMsg, ServerResponse};

use crate::{adapter_controller::AdapterController, control::ControlStateMachine, settings::SettingsStore};

/// §6: "Size cap per message: 1 MiB."
const MAX_FRAME_LEN: usize = 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub struct Decoder<D> {
    inner: LengthDelimitedCodec,
    _decode_type: std::marker::PhantomData<D>,
}

pub struct Encoder<E> {
    inner: LengthDelimitedCodec,
    _encode_type: std::marker::PhantomData<E>,
}

impl<D> Default for Decoder<D> {
    fn default() -> Self {
        Self {
            inner: codec(),
            _decode_type: std::marker::PhantomData,
        }
    }
}

impl<E> Default for Encoder<E> {
    fn default() -> Self {
        Self {
            inner: codec(),
            _encode_type: std::marker::PhantomData,
        }
    }
}

/// A malformed frame or an oversized length prefix both surface as a decode
/// error, which the caller treats as a framing violation and closes the
/// connection (§4.8, §7).
impl<D: serde::de::DeserializeOwned> tokio_util::codec::Decoder for Decoder<D> {
    type Error = anyhow::Error;
    type Item = D;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<D>> {
        let Some(frame) = self.inner.decode(buf)? else {
            return Ok(None);
        };
        let msg = serde_json::from_slice(&frame)
            .with_context(|| format!("Malformed IPC frame for {}", std::any::type_name::<D>()))?;
        Ok(Some(msg))
    }
}

impl<E: serde::Serialize> tokio_util::codec::Encoder<&E> for Encoder<E> {
    type Error = anyhow::Error;

    fn encode(&mut self, msg: &E, buf: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(msg).context("Failed to serialize IPC message")?;
        self.inner.encode(json.into(), buf)?;
        Ok(())
    }
}

type ClientRead = FramedRead<tokio::io::ReadHalf<platform::IpcStream>, Decoder<ClientMsg>>;
type ClientWrite = FramedWrite<tokio::io::WriteHalf<platform::IpcStream>, Encoder<ServerMsg>>;

/// Everything a client-dispatch task needs; cloned (cheaply, via `Arc`) into
/// every per-client task.
#[derive(Clone)]
pub struct IpcContext {
    pub settings: Arc<SettingsStore>,
    pub adapters: Arc<AdapterController>,
    pub control: Arc<ControlStateMachine>,
    pub notify: broadcast::Sender<ServerResponse>,
}

pub struct IpcServer {
    inner: platform::IpcServer,
    context: IpcContext,
}

impl IpcServer {
    pub async fn bind(runtime_dir: &std::path::Path, context: IpcContext) -> Result<Self> {
        let sock_path = runtime_dir.join("sdfw.sock");
        let inner = platform::IpcServer::bind(&sock_path)
            .await
            .context("Failed to bind IPC endpoint")?;
        Ok(Self { inner, context })
    }

    /// Runs forever, accepting clients and spawning one task per connection,
    /// until `cancel` fires.
    pub async fn serve(mut self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.inner.next_client() => match result {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("Failed to accept IPC client: {e:#}");
                        continue;
                    }
                },
            };

            let context = self.context.clone();
            let client_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, context, client_cancel).await {
                    tracing::debug!("IPC client disconnected: {e:#}");
                }
            });
        }
    }
}

async fn handle_client(
    stream: platform::IpcStream,
    context: IpcContext,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let (rx, tx) = tokio::io::split(stream);
    let mut reader: ClientRead = FramedRead::new(rx, Decoder::default());
    let mut writer: ClientWrite = FramedWrite::new(tx, Encoder::default());
    let mut notifications = context.notify.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            notification = notifications.recv() => {
                match notification {
                    Ok(response) => {
                        let envelope = messages::Envelope::new(response);
                        if writer.send(&envelope).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            frame = reader.next() => {
                let Some(frame) = frame else { return Ok(()) };
                // A decode error is a framing violation (§4.8): close the
                // connection without a response rather than trying to resync.
                let request = frame.context("IPC framing violation")?;
                let response = dispatch(&context, request.body).await;
                if let Some(response) = response {
                    let envelope = request.reply(response);
                    writer.send(&envelope).await.context("Failed to write IPC response")?;
                }
                // `None` means an unknown verb: §4.8 "unknown verbs get no
                // response, connection kept alive" — already handled by
                // `dispatch` returning `None` for those.
            }
        }
    }
}

/// Executes one request against the shared components and returns the
/// response payload, or `None` for an unrecognized verb (§4.8).
async fn dispatch(ctx: &IpcContext, request: ClientRequest) -> Option<ServerResponse> {
    if matches!(request, ClientRequest::Unknown) {
        return None;
    }

    Some(match request {
        ClientRequest::Unknown => unreachable!("handled above"),
        ClientRequest::GetStatus => {
            let (status, active, is_temporary, last_error) = ctx.control.status_snapshot().await;
            ServerResponse::Status {
                status,
                active_provider_id: active.as_ref().map(|p| p.id),
                active_provider_name: active.as_ref().map(|p| p.name.clone()),
                is_temporary,
                last_error,
                last_health_check: None,
                queries_handled: ctx.control.queries_handled().await,
            }
        }
        ClientRequest::GetConfig => ServerResponse::Config {
            settings: ctx.settings.snapshot().await,
        },
        ClientRequest::SaveConfig { settings } => match save_config(ctx, settings).await {
            Ok(()) => ServerResponse::Ack,
            Err(e) => error_response(e),
        },
        ClientRequest::GetAdapters { connected_only } => match ctx.adapters.list_adapters().await {
            Ok(adapters) => ServerResponse::Adapters {
                adapters: adapters
                    .iter()
                    .filter(|a| !connected_only || a.is_connected)
                    .map(AdapterSummary::from)
                    .collect(),
            },
            Err(e) => error_response(e),
        },
        ClientRequest::ApplyProfile { profile, enable } => apply_profile(ctx, profile, enable).await,
        ClientRequest::ConnectTemporary { provider_id } => switch_to(ctx, provider_id, true).await,
        ClientRequest::RevertToDefault => match ctx.control.revert_to_default().await {
            Ok(()) => ServerResponse::Ack,
            Err(e) => error_response(e),
        },
        ClientRequest::Disable { restore_original_dns } => {
            match ctx.control.disable(restore_original_dns).await {
                Ok(()) => ServerResponse::Ack,
                Err(e) => error_response(e),
            }
        }
        ClientRequest::TestProvider { provider_id, test_domain } => {
            test_provider(ctx, provider_id, &test_domain).await
        }
        ClientRequest::FlushDnsCache => match ctx.adapters.flush_dns_cache().await {
            Ok(()) => ServerResponse::Ack,
            Err(e) => error_response(e),
        },
    })
}

/// Root cause of a `find_provider` miss; lets [`error_response`] tell "no
/// such provider" apart from every other failure kind.
#[derive(Debug, thiserror::Error)]
#[error("Provider '{0}' not found")]
struct ProviderNotFound(model::ProviderId);

/// Translates a failure into the client-facing message, discriminating the
/// error kinds §7 calls out by walking the whole chain with [`ErrorExt`]
/// rather than always falling back to the generic Display rendering.
fn error_response(e: anyhow::Error) -> ServerResponse {
    if let Some(not_found) = e.any_downcast_ref::<ProviderNotFound>() {
        return ServerResponse::Error { message: not_found.to_string() };
    }
    if let Some(invalid) = e.any_downcast_ref::<model::InvalidProvider>() {
        return ServerResponse::Error { message: format!("invalid provider: {invalid}") };
    }
    if e.any_is::<std::io::Error>() {
        return ServerResponse::Error { message: format!("I/O error: {e:#}") };
    }
    ServerResponse::Error { message: format!("{e:#}") }
}

async fn find_provider(ctx: &IpcContext, id: model::ProviderId) -> Result<Arc<model::Provider>> {
    ctx.settings
        .snapshot()
        .await
        .providers
        .into_iter()
        .find(|p| p.id == id)
        .map(Arc::new)
        .ok_or_else(|| anyhow::Error::from(ProviderNotFound(id)))
}

/// Validates every provider in the incoming document before persisting it,
/// so a malformed `SaveConfig` fails with `error_response`'s "invalid
/// provider" kind instead of silently committing garbage.
async fn save_config(ctx: &IpcContext, settings: model::AppSettings) -> Result<()> {
    for provider in &settings.providers {
        provider.validate()?;
    }
    ctx.settings.replace(settings).await
}

async fn apply_profile(ctx: &IpcContext, profile: model::Profile, enable: bool) -> ServerResponse {
    let provider = match find_provider(ctx, profile.provider_id).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    if let Err(e) = provider.validate() {
        return error_response(e.into());
    }

    if let Err(e) = ctx
        .settings
        .mutate(|s| s.default_profile = Some(profile.clone()))
        .await
    {
        return error_response(e);
    }

    if !enable {
        return ServerResponse::Ack;
    }

    let applied = match ctx.adapters.take_over(&profile.adapter_ids).await {
        Ok(applied) => applied,
        Err(e) => return error_response(e),
    };
    if applied == 0 {
        return ServerResponse::Error { message: "no adapters were successfully taken over".into() };
    }

    let (status, ..) = ctx.control.status_snapshot().await;
    let result = if matches!(status, model::ConnectionStatus::Inactive) {
        ctx.control.start(provider).await
    } else {
        ctx.control.switch(provider, false).await
    };

    match result {
        Ok(()) => ServerResponse::Ack,
        Err(e) => error_response(e),
    }
}

async fn switch_to(ctx: &IpcContext, provider_id: model::ProviderId, is_temporary: bool) -> ServerResponse {
    let provider = match find_provider(ctx, provider_id).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    match ctx.control.switch(provider, is_temporary).await {
        Ok(()) => ServerResponse::Ack,
        Err(e) => error_response(e),
    }
}

async fn test_provider(ctx: &IpcContext, provider_id: model::ProviderId, test_domain: &str) -> ServerResponse {
    let provider = match find_provider(ctx, provider_id).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    match ctx.control.test_provider(&provider, test_domain).await {
        Ok(latency) => ServerResponse::TestResult {
            success: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
        },
        Err(e) => ServerResponse::TestResult {
            success: false,
            latency_ms: None,
            error: Some(format!("{e:#}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter_controller::AdapterController, control::ControlStateMachine, upstream::UpstreamTransport};
    use tokio_util::codec::{Decoder as _, Encoder as _};

    async fn context() -> IpcContext {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let adapters = Arc::new(AdapterController::new(settings.clone()));
        let transport = Arc::new(UpstreamTransport::new());
        let control = Arc::new(ControlStateMachine::new(transport, adapters.clone(), settings.clone()));
        let (notify, _) = broadcast::channel(8);

        IpcContext {
            settings,
            adapters,
            control,
            notify,
        }
    }

    #[test]
    fn a_message_round_trips_through_the_frame_codec() {
        let request = ClientMsg::new(ClientRequest::GetStatus);

        let mut encoder = Encoder::<ClientMsg>::default();
        let mut buf = BytesMut::new();
        encoder.encode(&request, &mut buf).unwrap();

        // 4-byte little-endian length prefix, per §6.
        let declared_len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(declared_len, buf.len() - 4);

        let mut decoder = Decoder::<ClientMsg>::default();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded.body, ClientRequest::GetStatus));
        assert_eq!(decoded.message_id, request.message_id);
    }

    #[test]
    fn a_truncated_buffer_decodes_to_nothing_yet() {
        let mut decoder = Decoder::<ClientMsg>::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_framing_violation() {
        // Hand-build one frame: 4-byte LE length prefix + a payload that
        // isn't valid JSON for `ClientMsg` at all.
        let payload = b"not json";
        let mut raw = BytesMut::new();
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        raw.extend_from_slice(payload);

        let mut decoder = Decoder::<ClientMsg>::default();
        assert!(decoder.decode(&mut raw).is_err());
    }

    #[tokio::test]
    async fn dispatch_sends_no_response_for_an_unknown_verb() {
        let ctx = context().await;
        assert!(dispatch(&ctx, ClientRequest::Unknown).await.is_none());
    }

    #[tokio::test]
    async fn dispatch_get_config_returns_the_current_snapshot() {
        let ctx = context().await;
        let response = dispatch(&ctx, ClientRequest::GetConfig).await.unwrap();
        let ServerResponse::Config { settings } = response else {
            panic!("expected a Config response");
        };
        assert_eq!(settings.enabled, ctx.settings.snapshot().await.enabled);
    }

    #[tokio::test]
    async fn dispatch_apply_profile_reports_an_unknown_provider_as_not_found() {
        let ctx = context().await;
        let response = dispatch(
            &ctx,
            ClientRequest::ApplyProfile {
                profile: model::Profile {
                    provider_id: model::ProviderId::random(),
                    adapter_ids: vec![],
                },
                enable: true,
            },
        )
        .await
        .unwrap();
        let ServerResponse::Error { message } = response else {
            panic!("expected an Error response");
        };
        assert!(message.contains("not found"));
    }

    #[tokio::test]
    async fn dispatch_apply_profile_rejects_adapters_that_cannot_be_taken_over() {
        let ctx = context().await;
        let provider_id = ctx.settings.snapshot().await.providers[0].id;

        let response = dispatch(
            &ctx,
            ClientRequest::ApplyProfile {
                profile: model::Profile {
                    provider_id,
                    adapter_ids: vec![model::AdapterId::new("no-such-adapter")],
                },
                enable: true,
            },
        )
        .await
        .unwrap();
        let ServerResponse::Error { message } = response else {
            panic!("expected an Error response");
        };
        assert!(message.contains("no adapters were successfully taken over"));
    }

    #[tokio::test]
    async fn dispatch_test_provider_reports_an_unknown_id_as_an_error() {
        let ctx = context().await;
        let response = dispatch(
            &ctx,
            ClientRequest::TestProvider {
                provider_id: model::ProviderId::random(),
                test_domain: "example.com".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(response, ServerResponse::Error { .. }));
    }
}
