//! Method catalogue and per-request dispatch: resolves a parsed [`RpcRequest`]
//! against session auth state and the application components, producing a
//! response (or `None` for a client-sent notification, which never replies).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Scope;
use crate::camera::camera_id_for_device;
use crate::config::RecordingFormat;
use crate::error::{AppError, ErrorCode, Result};
use crate::recording::{StartOptions, StopReason};
use crate::session::{tier_for_method, AuthTier, Session};
use crate::snapshot::{SnapshotFormat, SnapshotOptions};
use crate::state::AppState;

use super::protocol::{RequestId, RpcError, RpcParseErrorResponse, RpcRequest, RpcResponse};

/// Accepts either a canonical `cameraN` identifier or a raw `/dev/videoN` path,
/// since `start_recording`/`stop_recording` examples in the field use the latter.
fn resolve_camera_id(device: &str) -> Result<String> {
    if device.starts_with("/dev/video") {
        camera_id_for_device(device)
    } else if device.starts_with("camera") && device.len() > 6 && device[6..].bytes().all(|b| b.is_ascii_digit()) {
        Ok(device.to_string())
    } else {
        Err(AppError::Unsupported(format!("unrecognized device identifier: {device}")))
    }
}

fn params_of<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| AppError::InvalidParams(e.to_string()))
}

/// Dispatches one request. Returns `None` only when the request carried no
/// `id` (a notification); every real client request yields a response.
pub async fn dispatch_request(state: &AppState, session: &mut Session, request: RpcRequest) -> Option<RpcResponse> {
    session.touch();
    let id = request.id.clone();

    if request.version != "2.0" {
        return id.map(|id| RpcResponse::err(id, RpcError::new(ErrorCode::InvalidRequest, "unsupported protocol version")));
    }

    let tier = tier_for_method(&request.method);
    if tier != AuthTier::Public {
        if !session.is_authenticated() {
            return id.map(|id| RpcResponse::err(id, RpcError::new(ErrorCode::AuthRequired, "authentication required")));
        }
        let required = match tier {
            AuthTier::Read => Scope::Read,
            AuthTier::Control => Scope::Control,
            AuthTier::Public => unreachable!("public tier handled above"),
        };
        if !session.has_scope(required) {
            return id.map(|id| RpcResponse::err(id, RpcError::new(ErrorCode::PermissionDenied, "missing required scope")));
        }
    }

    let Some(_permit) = session.try_begin_request() else {
        return id.map(|id| RpcResponse::err(id, RpcError::new(ErrorCode::RateLimited, "too many in-flight requests")));
    };

    state.health.metrics.record_request();
    let outcome = handle_method(state, session, &request.method, request.params.unwrap_or(Value::Null)).await;

    id.map(|id| match outcome {
        Ok(result) => RpcResponse::ok(id, result),
        Err(e) => RpcResponse::err(id, RpcError::from(&e)),
    })
}

/// Handles one inbound WebSocket text frame: size cap, JSON parse, single vs.
/// batch dispatch. Returns the serialized response frames to send back, in
/// order; an empty vec means nothing should be sent (e.g. an all-notification
/// batch).
pub async fn handle_frame(state: &AppState, session: &mut Session, raw: &str, max_frame_bytes: usize) -> Vec<Value> {
    if raw.len() > max_frame_bytes {
        return vec![parse_error_value(ErrorCode::ParseError, "frame exceeds maximum size")];
    }

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return vec![parse_error_value(ErrorCode::ParseError, "malformed json")],
    };

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return vec![parse_error_value(ErrorCode::InvalidRequest, "batch must not be empty")];
            }
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_value::<RpcRequest>(item) {
                    Ok(request) => {
                        if let Some(response) = dispatch_request(state, session, request).await {
                            responses.push(serde_json::to_value(response).expect("RpcResponse always serializes"));
                        }
                    }
                    Err(_) => responses.push(parse_error_value(ErrorCode::InvalidRequest, "malformed request in batch")),
                }
            }
            responses
        }
        single => match serde_json::from_value::<RpcRequest>(single) {
            Ok(request) => match dispatch_request(state, session, request).await {
                Some(response) => vec![serde_json::to_value(response).expect("RpcResponse always serializes")],
                None => vec![],
            },
            Err(_) => vec![parse_error_value(ErrorCode::InvalidRequest, "malformed request")],
        },
    }
}

fn parse_error_value(code: ErrorCode, message: &str) -> Value {
    serde_json::to_value(RpcParseErrorResponse::new(RpcError::new(code, message))).expect("RpcParseErrorResponse always serializes")
}

async fn handle_method(state: &AppState, session: &mut Session, method: &str, params: Value) -> Result<Value> {
    match method {
        "ping" => Ok(json!("pong")),
        "authenticate" => authenticate(state, session, params).await,
        "get_server_info" => get_server_info(),

        "get_camera_list" => get_camera_list(state).await,
        "get_camera_status" => get_camera_status(state, params).await,
        "get_camera_capabilities" => get_camera_capabilities(state, params).await,
        "get_stream_url" => get_stream_url(state, params).await,
        "get_streams" => get_streams(state).await,

        "take_snapshot" => take_snapshot(state, params).await,
        "start_recording" => start_recording(state, params).await,
        "stop_recording" => stop_recording(state, params).await,

        "list_recordings" => list_recordings(state, params).await,
        "list_snapshots" => list_snapshots(state, params).await,
        "get_recording_info" => get_file_info(state, params, crate::catalog::FileCategory::Recording).await,
        "get_snapshot_info" => get_file_info(state, params, crate::catalog::FileCategory::Snapshot).await,
        "delete_recording" => delete_file(state, params, crate::catalog::FileCategory::Recording).await,
        "delete_snapshot" => delete_file(state, params, crate::catalog::FileCategory::Snapshot).await,

        "get_status" | "get_system_status" => get_system_status(state).await,
        "get_storage_info" => get_storage_info(state).await,
        "get_metrics" => Ok(serde_json::to_value(state.health.metrics.snapshot())?),

        "subscribe_events" => subscribe_events(session, params),
        "unsubscribe_events" => unsubscribe_events(session, params),
        "get_subscription_stats" => get_subscription_stats(session),

        other => Err(AppError::MethodNotFound(other.to_string())),
    }
}

#[derive(Deserialize)]
struct AuthenticateParams {
    auth_token: Option<String>,
    token: Option<String>,
}

async fn authenticate(state: &AppState, session: &mut Session, params: Value) -> Result<Value> {
    let parsed: AuthenticateParams = params_of(params)?;
    if parsed.auth_token.is_none() && parsed.token.is_some() {
        return Err(AppError::InvalidParams("use `auth_token`, not `token`".to_string()));
    }
    let token = parsed.auth_token.ok_or_else(|| AppError::InvalidParams("missing auth_token".to_string()))?;

    let claims = state.auth.verify(&token)?;
    let role = claims.roles.first().map(|r| serde_json::to_value(r).unwrap_or(Value::Null));
    session.claims = Some(claims);
    Ok(json!({ "authenticated": true, "role": role }))
}

fn get_server_info() -> Result<Value> {
    Ok(json!({
        "name": "camera-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_camera_list(state: &AppState) -> Result<Value> {
    let snapshot = state.camera_registry.list().await;
    Ok(json!({
        "cameras": snapshot.cameras,
        "total": snapshot.total,
        "connected": snapshot.connected_count,
    }))
}

#[derive(Deserialize)]
struct DeviceParams {
    device: String,
}

async fn get_camera_status(state: &AppState, params: Value) -> Result<Value> {
    let parsed: DeviceParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;
    let camera = state.camera_registry.get(&camera_id).await?;
    Ok(serde_json::to_value(camera)?)
}

async fn get_camera_capabilities(state: &AppState, params: Value) -> Result<Value> {
    let parsed: DeviceParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;
    let camera = state.camera_registry.get(&camera_id).await?;
    Ok(json!({ "capabilities": camera.capabilities }))
}

async fn get_stream_url(state: &AppState, params: Value) -> Result<Value> {
    let parsed: DeviceParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;
    let camera = state.camera_registry.get(&camera_id).await?;
    Ok(json!({ "stream_urls": camera.stream_urls }))
}

async fn get_streams(state: &AppState) -> Result<Value> {
    let snapshot = state.camera_registry.list().await;
    let streams: Vec<Value> = snapshot
        .cameras
        .iter()
        .filter(|c| c.stream_urls.is_some())
        .map(|c| json!({ "camera_id": c.identifier, "urls": c.stream_urls }))
        .collect();
    Ok(json!({ "streams": streams }))
}

#[derive(Deserialize)]
struct TakeSnapshotParams {
    device: String,
    filename: Option<String>,
    format: Option<SnapshotFormat>,
    quality: Option<u8>,
}

async fn take_snapshot(state: &AppState, params: Value) -> Result<Value> {
    let parsed: TakeSnapshotParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;
    let result = state
        .snapshot_manager
        .take(&camera_id, SnapshotOptions { filename: parsed.filename, format: parsed.format, quality: parsed.quality })
        .await?;
    if result.status == crate::snapshot::SnapshotStatus::Success {
        state.health.metrics.record_snapshot_taken();
    }
    Ok(serde_json::to_value(result)?)
}

#[derive(Deserialize)]
struct StartRecordingParams {
    device: String,
    duration: Option<f64>,
    format: Option<String>,
}

async fn start_recording(state: &AppState, params: Value) -> Result<Value> {
    let parsed: StartRecordingParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;

    let duration = match parsed.duration {
        Some(secs) if secs < 0.0 => return Err(AppError::InvalidParams("duration must be >= 0".to_string())),
        Some(secs) => Some(std::time::Duration::from_secs_f64(secs)),
        None => None,
    };
    let format = match parsed.format {
        Some(raw) => Some(RecordingFormat::parse(&raw).ok_or_else(|| AppError::InvalidParams(format!("unknown format: {raw}")))?),
        None => None,
    };

    let view = state.recording_manager.start(&camera_id, StartOptions { duration, format }).await?;
    state.health.metrics.record_recording_started();
    Ok(serde_json::to_value(view)?)
}

async fn stop_recording(state: &AppState, params: Value) -> Result<Value> {
    let parsed: DeviceParams = params_of(params)?;
    let camera_id = resolve_camera_id(&parsed.device)?;
    let view = state.recording_manager.stop(&camera_id, StopReason::User).await?;
    let mut value = serde_json::to_value(&view)?;
    if let Value::Object(map) = &mut value {
        map.insert("final_state".to_string(), serde_json::to_value(view.state)?);
    }
    Ok(value)
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_recordings(state: &AppState, params: Value) -> Result<Value> {
    let parsed: PageParams = params_of(params)?;
    let listing = state.catalog.list_recordings(parsed.limit, parsed.offset).await?;
    Ok(serde_json::to_value(listing)?)
}

async fn list_snapshots(state: &AppState, params: Value) -> Result<Value> {
    let parsed: PageParams = params_of(params)?;
    let listing = state.catalog.list_snapshots(parsed.limit, parsed.offset).await?;
    Ok(serde_json::to_value(listing)?)
}

#[derive(Deserialize)]
struct FilenameParams {
    filename: String,
}

async fn get_file_info(state: &AppState, params: Value, expected: crate::catalog::FileCategory) -> Result<Value> {
    let parsed: FilenameParams = params_of(params)?;
    let entry = state.catalog.get_info(&parsed.filename).await?;
    if entry.category != expected {
        return Err(AppError::NotFound(format!("no such file: {}", parsed.filename)));
    }
    Ok(serde_json::to_value(entry)?)
}

async fn delete_file(state: &AppState, params: Value, expected: crate::catalog::FileCategory) -> Result<Value> {
    let parsed: FilenameParams = params_of(params)?;
    state.catalog.delete(&parsed.filename, expected).await?;
    Ok(json!({ "deleted": true, "filename": parsed.filename }))
}

async fn get_system_status(state: &AppState) -> Result<Value> {
    let snapshot = state.camera_registry.list().await;
    let active_recordings = state.recording_manager.list_active().await.len();
    let status = crate::health::SystemStatus {
        uptime_secs: state.health.uptime_secs(),
        mediamtx_healthy: state.mediamtx.health().await,
        camera_count: snapshot.total,
        connected_count: snapshot.connected_count,
        active_recordings,
    };
    Ok(serde_json::to_value(status)?)
}

async fn get_storage_info(state: &AppState) -> Result<Value> {
    let config = state.config.get();
    Ok(serde_json::to_value(crate::health::storage_info(&config.storage)?)?)
}

#[derive(Deserialize)]
struct TopicsParams {
    topics: Vec<String>,
}

fn subscribe_events(session: &mut Session, params: Value) -> Result<Value> {
    let parsed: TopicsParams = params_of(params)?;
    session.subscriptions.extend(parsed.topics.iter().cloned());
    Ok(json!({ "subscribed": parsed.topics }))
}

fn unsubscribe_events(session: &mut Session, params: Value) -> Result<Value> {
    let parsed: TopicsParams = params_of(params)?;
    for topic in &parsed.topics {
        session.subscriptions.remove(topic);
    }
    Ok(json!({ "unsubscribed": parsed.topics }))
}

fn get_subscription_stats(session: &Session) -> Result<Value> {
    Ok(json!({
        "subscriptions": session.subscriptions.iter().cloned().collect::<Vec<_>>(),
        "count": session.subscriptions.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthVerifier;
    use crate::camera::CameraRegistry;
    use crate::config::AuthConfig;
    use crate::catalog::FileCatalog;
    use crate::events::EventBus;
    use crate::health::HealthState;
    use crate::mediamtx::fake::FakeMediaBackend;
    use crate::recording::RecordingManager;
    use crate::snapshot::SnapshotManager;
    use crate::storage::fake::FakeFileStore;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use tokio::sync::broadcast;

    fn test_state() -> Arc<AppState> {
        let events = EventBus::new(16);
        let camera_registry = Arc::new(CameraRegistry::new(events.clone(), StdDuration::from_secs(10), StdDuration::from_millis(0)));
        let backend: Arc<dyn crate::mediamtx::MediaBackend> = Arc::new(FakeMediaBackend::always_ready());
        let health = Arc::new(HealthState::default());
        let recording_manager = RecordingManager::new(
            backend.clone(),
            camera_registry.clone(),
            events.clone(),
            PathBuf::from("/tmp/recordings"),
            &crate::config::RecordingConfig::default(),
            Arc::new(crate::clock::SystemClock),
            health.clone(),
        );
        let snapshot_manager = Arc::new(SnapshotManager::new(
            backend.clone(),
            camera_registry.clone(),
            events.clone(),
            Arc::new(FakeFileStore::default()),
            PathBuf::from("/tmp/snapshots"),
            Arc::new(crate::clock::SystemClock),
        ));
        let catalog = Arc::new(FileCatalog::new(Arc::new(FakeFileStore::default()), PathBuf::from("/tmp/recordings"), PathBuf::from("/tmp/snapshots")));
        let auth = Arc::new(AuthVerifier::new(&AuthConfig { secret: "s3cret".to_string(), ..Default::default() }).unwrap());
        let (shutdown_tx, _) = broadcast::channel(1);
        AppState::new(
            crate::config::ConfigStore::from_config(crate::config::AppConfig::default()),
            camera_registry,
            recording_manager,
            snapshot_manager,
            catalog,
            events,
            auth,
            health,
            backend,
            shutdown_tx,
            PathBuf::from("/tmp"),
        )
    }

    #[tokio::test]
    async fn ping_is_public_and_needs_no_auth() {
        let state = test_state();
        let mut session = Session::new(64);
        let response = dispatch_request(
            &state,
            &mut session,
            RpcRequest { version: "2.0".to_string(), method: "ping".to_string(), params: None, id: Some(RequestId::Number(1)) },
        )
        .await
        .unwrap();
        assert_eq!(response.result, Some(json!("pong")));
    }

    #[tokio::test]
    async fn control_method_without_auth_is_rejected() {
        let state = test_state();
        let mut session = Session::new(64);
        let response = dispatch_request(
            &state,
            &mut session,
            RpcRequest {
                version: "2.0".to_string(),
                method: "start_recording".to_string(),
                params: Some(json!({ "device": "/dev/video0" })),
                id: Some(RequestId::Number(2)),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, ErrorCode::AuthRequired);
    }

    #[tokio::test]
    async fn authenticate_rejects_legacy_token_field() {
        let state = test_state();
        let mut session = Session::new(64);
        let response = dispatch_request(
            &state,
            &mut session,
            RpcRequest {
                version: "2.0".to_string(),
                method: "authenticate".to_string(),
                params: Some(json!({ "token": "abc" })),
                id: Some(RequestId::Number(3)),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let state = test_state();
        let mut session = Session::new(64);
        let response = dispatch_request(
            &state,
            &mut session,
            RpcRequest { version: "2.0".to_string(), method: "frobnicate".to_string(), params: None, id: Some(RequestId::Number(4)) },
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, ErrorCode::MethodNotFound);
    }
}
