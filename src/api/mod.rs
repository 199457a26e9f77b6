//! HTTP surface: alert queries, system status and the media relay.
//!
//! A minimal HTTP/1.1 server over `std::net`. The accept loop runs on its own
//! thread and hands each connection to a short-lived handler thread, up to
//! `max_concurrent_requests`; beyond that the server answers 503 inline.
//! Every response is JSON or relayed media with an explicit status. Handler
//! errors never reach the wire as raw text.

use crate::alert::AlertStore;
use crate::classify::ModelStatus;
use crate::relay::{MediaRelay, RelayError};
use crate::supervisor::ShutdownSignal;
use anyhow::{anyhow, Result};
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// Everything a request handler reads. Shared by all handler threads.
pub struct ApiState {
    pub alerts: AlertStore,
    pub relay: MediaRelay,
    pub model_status: ModelStatus,
    pub source_count: usize,
}

pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: ShutdownSignal,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting and join the accept loop. In-flight handlers finish
    /// on their own threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self {
            cfg,
            state: Arc::new(state),
        }
    }

    /// Bind and start serving. `shutdown` is shared with the rest of the
    /// daemon so one trigger stops everything.
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown_thread = shutdown.clone();
        let limit = self.cfg.max_concurrent_requests.max(1);
        let state = self.state.clone();
        let join = std::thread::Builder::new()
            .name("api-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state, limit, shutdown_thread) {
                    log::error!("api server stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: Arc<ApiState>,
    limit: usize,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let in_flight = InFlight::new(limit);
    loop {
        if shutdown.is_triggered() {
            break;
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    log::warn!("api connection setup failed: {}", err);
                    continue;
                }
                let Some(slot) = in_flight.try_acquire() else {
                    let _ = write_json_response(
                        &mut stream,
                        503,
                        &json!({ "error": "overloaded" }),
                    );
                    continue;
                };
                let state = state.clone();
                // The slot is released when the closure is dropped, which also
                // happens when the spawn itself fails.
                let spawned = std::thread::Builder::new()
                    .name("api-request".to_string())
                    .spawn(move || {
                        let _slot = slot;
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("api request failed: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn request handler: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                shutdown.wait(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Counts requests being handled, up to a fixed limit.
struct InFlight {
    count: Arc<AtomicUsize>,
    limit: usize,
}

impl InFlight {
    fn new(limit: usize) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    fn try_acquire(&self) -> Option<InFlightSlot> {
        if self.count.fetch_add(1, Ordering::SeqCst) >= self.limit {
            self.count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(InFlightSlot {
            count: self.count.clone(),
        })
    }

    #[cfg(test)]
    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

struct InFlightSlot {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, &json!({ "error": "bad_request" }))?;
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);

    match request.method.as_str() {
        "GET" => {}
        "OPTIONS" => return write_response(&mut stream, 204, "text/plain", &[]),
        _ => {
            return write_json_response(
                &mut stream,
                405,
                &json!({ "error": "method_not_allowed" }),
            )
        }
    }

    match route(&request.path) {
        Route::Root => write_json_response(
            &mut stream,
            200,
            &json!({ "message": "Backend running", "status": "ok" }),
        ),
        Route::Health => write_json_response(&mut stream, 200, &json!({ "status": "ok" })),
        Route::SystemStatus => write_json_response(
            &mut stream,
            200,
            &json!({
                "ai_model_status": state.model_status,
                "sources": state.source_count,
            }),
        ),
        Route::AllAlerts => {
            let payload = serde_json::to_vec(&state.alerts.get_all())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::Alert(id) => {
            let payload = serde_json::to_vec(&state.alerts.get(&id))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::Manifest(id) => {
            write_relayed(&mut stream, state.relay.fetch_manifest(&id))
        }
        Route::Segment(path) => {
            write_relayed(&mut stream, state.relay.fetch_segment(path))
        }
        Route::BadParameter => {
            write_json_response(&mut stream, 400, &json!({ "error": "invalid_path" }))
        }
        Route::NotFound => {
            write_json_response(&mut stream, 404, &json!({ "error": "not_found" }))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Root,
    Health,
    SystemStatus,
    AllAlerts,
    Alert(Cow<'a, str>),
    Manifest(Cow<'a, str>),
    /// Still percent-encoded; relayed upstream as received.
    Segment(&'a str),
    /// A path parameter that does not decode to UTF-8.
    BadParameter,
    NotFound,
}

fn route(path: &str) -> Route<'_> {
    match path {
        "/" => return Route::Root,
        "/health" => return Route::Health,
        "/system/status" => return Route::SystemStatus,
        "/alerts/all" => return Route::AllAlerts,
        _ => {}
    }
    if let Some(id) = path.strip_prefix("/alerts/") {
        if !id.is_empty() && !id.contains('/') {
            return decode_parameter(id).map_or(Route::BadParameter, Route::Alert);
        }
        return Route::NotFound;
    }
    if let Some(rest) = path.strip_prefix("/stream/") {
        if let Some(id) = rest.strip_suffix(".m3u8") {
            if !id.is_empty() && !id.contains('/') {
                return decode_parameter(id).map_or(Route::BadParameter, Route::Manifest);
            }
        }
        return Route::Segment(rest);
    }
    Route::NotFound
}

/// Percent-decode a single path segment. `+` stays literal.
fn decode_parameter(raw: &str) -> Option<Cow<'_, str>> {
    percent_decode_str(raw).decode_utf8().ok()
}

fn write_relayed(
    stream: &mut TcpStream,
    result: std::result::Result<crate::relay::RelayedMedia, RelayError>,
) -> Result<()> {
    match result {
        Ok(media) => write_response(stream, 200, media.content_type, &media.body),
        Err(err) => write_json_response(
            stream,
            err.status(),
            &json!({ "error": err.code(), "detail": err.to_string() }),
        ),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(
    stream: &mut TcpStream,
    status: u16,
    body: &serde_json::Value,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\
         Access-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, OPTIONS\r\n\
         Access-Control-Allow-Headers: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_routes_win_over_parameters() {
        assert_eq!(route("/"), Route::Root);
        assert_eq!(route("/alerts/all"), Route::AllAlerts);
        assert_eq!(route("/alerts/drone1"), Route::Alert("drone1".into()));
        assert_eq!(route("/system/status"), Route::SystemStatus);
    }

    #[test]
    fn stream_routes_split_manifest_and_segment() {
        assert_eq!(route("/stream/drone1.m3u8"), Route::Manifest("drone1".into()));
        assert_eq!(route("/stream/seg0.ts"), Route::Segment("seg0.ts"));
        // Nested playlists go to the segment origin.
        assert_eq!(
            route("/stream/drone1/index.m3u8"),
            Route::Segment("drone1/index.m3u8")
        );
        assert_eq!(route("/stream/.m3u8"), Route::Segment(".m3u8"));
    }

    #[test]
    fn path_parameters_are_percent_decoded() {
        assert_eq!(route("/alerts/drone%201"), Route::Alert("drone 1".into()));
        assert_eq!(route("/alerts/dr%C3%B6ne"), Route::Alert("dröne".into()));
        assert_eq!(route("/alerts/a+b"), Route::Alert("a+b".into()));
        assert_eq!(
            route("/stream/drone%201.m3u8"),
            Route::Manifest("drone 1".into())
        );
        assert_eq!(route("/alerts/%FF"), Route::BadParameter);
        assert_eq!(route("/stream/%FF.m3u8"), Route::BadParameter);
        // Segment paths are relayed untouched.
        assert_eq!(route("/stream/a%20b.ts"), Route::Segment("a%20b.ts"));
    }

    #[test]
    fn in_flight_slots_are_released_on_drop() {
        let in_flight = InFlight::new(2);
        let first = in_flight.try_acquire().expect("first slot");
        let second = in_flight.try_acquire().expect("second slot");
        assert!(in_flight.try_acquire().is_none());
        assert_eq!(in_flight.current(), 2);

        // A handler closure that never runs still gives its slot back.
        let never_run = move || drop(first);
        drop(never_run);
        assert_eq!(in_flight.current(), 1);
        assert!(in_flight.try_acquire().is_some());

        drop(second);
        assert_eq!(in_flight.current(), 0);
    }

    #[test]
    fn malformed_alert_paths_are_not_found() {
        assert_eq!(route("/alerts/"), Route::NotFound);
        assert_eq!(route("/alerts/a/b"), Route::NotFound);
        assert_eq!(route("/events"), Route::NotFound);
    }
}
