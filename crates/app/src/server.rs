//! Actix Web server exposing the dashboard, MJPEG preview, SSE event stream and
//! the control/intake endpoints.
//!
//! The server runs on a dedicated thread to keep the processing loop free from
//! Actix runtime concerns. Handlers only talk to the [`Monitor`] facade.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use monitor::{
    Monitor, MonitorError, MonitorStatus, RecordingStatus, StreamState, VisionMode,
    events::metrics::{HTTP_API_CALLS, STREAM_CONNECTIONS},
    pipeline::telemetry,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use video_ingest::Frame;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const FRAME_PTS_HEADER: &str = "x-frame-pts";

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) monitor: Arc<Monitor>,
    /// Identity handed to pushed frames that arrive without a pts header.
    /// Always kept past any pts a client has sent.
    next_pts: AtomicI64,
}

impl ServerState {
    pub(crate) fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            next_pts: AtomicI64::new(0),
        }
    }

    fn count_api_call(&self) {
        self.monitor.metrics().increment(HTTP_API_CALLS);
    }

    /// Identity for a pushed frame: the client's, or a fresh one that cannot
    /// collide with anything the client has used.
    fn frame_pts(&self, client: Option<i64>) -> i64 {
        match client {
            Some(pts) => {
                self.next_pts
                    .fetch_max(pts.saturating_add(1), Ordering::Relaxed);
                pts
            }
            None => self.next_pts.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Handle for the HTTP server thread.
pub(crate) struct HttpServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Deserialize)]
struct VisionModeRequest {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    stream_status: &'static str,
    #[serde(flatten)]
    details: MonitorStatus,
}

/// Spawn the server thread and return a handle that can stop it.
pub(crate) fn spawn_http_server(
    monitor: Arc<Monitor>,
    bind: &str,
    port: u16,
) -> Result<HttpServerHandle> {
    let state = web::Data::new(ServerState::new(monitor));
    let bind = bind.to_string();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("http-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || App::new().configure(routes(state.clone())))
                .bind((bind.as_str(), port))?
                .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;
    Ok(HttpServerHandle {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Route table, shared by the server and the handler tests.
pub(crate) fn routes(state: web::Data<ServerState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(state)
            .app_data(web::PayloadConfig::new(MAX_FRAME_BYTES))
            .route("/", web::get().to(index_route))
            .route("/stream-updates", web::get().to(stream_updates_handler))
            .route("/video_feed", web::get().to(video_feed_handler))
            .route("/status", web::get().to(status_handler))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/metrics/prometheus", web::get().to(prometheus_handler))
            .route("/start-recording", web::post().to(start_recording_handler))
            .route("/stop-recording", web::post().to(stop_recording_handler))
            .route("/sensor", web::post().to(sensor_handler))
            .route("/sensor/latest", web::get().to(latest_sensor_handler))
            .route("/frame", web::post().to(frame_handler))
            .route("/set-vision-mode", web::post().to(set_vision_mode_handler));
    }
}

/// Serve the dashboard page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::DASHBOARD_HTML)
}

/// Forward monitor events as Server-Sent Events; one bus subscription per
/// connection, dropped with it.
async fn stream_updates_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.monitor.metrics().increment(STREAM_CONNECTIONS);
    let mut events = state.monitor.subscribe_events();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 1000\n\n"));
        let mut keep_alive = actix_web::rt::time::interval(SSE_KEEP_ALIVE);
        keep_alive.tick().await;
        loop {
            let next = tokio::select! {
                event = events.recv() => Some(event),
                _ = keep_alive.tick() => None,
            };
            match next {
                Some(Some(event)) => match event.to_sse() {
                    Ok(frame) => yield Ok::<Bytes, actix_web::Error>(Bytes::from(frame)),
                    Err(err) => error!("dropping {} event: {err}", event.event_type()),
                },
                Some(None) => break,
                None => yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n")),
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Stream the fused preview as multipart MJPEG.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    state.monitor.metrics().increment(STREAM_CONNECTIONS);
    let state = state.clone();
    let period = state.monitor.config().poll_interval;
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(period);
        loop {
            interval.tick().await;
            if let Some(packet) = state.monitor.latest_frame() {
                let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
                payload.extend_from_slice(b"--frame\r\n");
                payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                payload.extend_from_slice(&packet.jpeg);
                payload.extend_from_slice(b"\r\n");
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    let details = state.monitor.status();
    let stream_status = match details.stream_state {
        Some(StreamState::Live) => "Live",
        Some(StreamState::Frozen) => "Frozen",
        Some(StreamState::Offline) | None => "Offline",
    };
    HttpResponse::Ok().json(StatusResponse {
        stream_status,
        details,
    })
}

async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    HttpResponse::Ok().json(state.monitor.snapshot_metrics())
}

async fn prometheus_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

async fn start_recording_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    let monitor = state.monitor.clone();
    recording_response(web::block(move || monitor.start_recording()).await)
}

async fn stop_recording_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    let monitor = state.monitor.clone();
    recording_response(web::block(move || monitor.stop_recording()).await)
}

fn recording_response(
    result: Result<Result<RecordingStatus, MonitorError>, actix_web::error::BlockingError>,
) -> HttpResponse {
    match result {
        Ok(Ok(status)) => {
            let body = match &status {
                RecordingStatus::Started { file }
                | RecordingStatus::AlreadyRecording { file }
                | RecordingStatus::Stopped { file } => {
                    json!({ "status": status.message(), "filename": file })
                }
                RecordingStatus::NotRecording => json!({ "status": status.message() }),
            };
            HttpResponse::Ok().json(body)
        }
        Ok(Err(err)) => {
            error!("recording control failed: {err}");
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
        Err(err) => HttpResponse::InternalServerError().json(json!({ "error": err.to_string() })),
    }
}

/// Accept one sensor/position message from the robot.
async fn sensor_handler(state: web::Data<ServerState>, body: web::Json<Value>) -> HttpResponse {
    state.count_api_call();
    let monitor = state.monitor.clone();
    let message = body.into_inner();
    match web::block(move || monitor.ingest_sensor_message(&message)).await {
        Ok(Ok(report)) => HttpResponse::Ok().json(json!({
            "accepted": report.snapshot.is_some(),
            "position": report.position.is_some(),
            "record_triggered": report.record_triggered,
            "row_written": report.row_written,
        })),
        Ok(Err(err @ MonitorError::Json(_))) => {
            debug!("rejected sensor message: {err}");
            HttpResponse::BadRequest().json(json!({ "error": err.to_string() }))
        }
        Ok(Err(err)) => {
            error!("sensor message failed: {err}");
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
        Err(err) => HttpResponse::InternalServerError().json(json!({ "error": err.to_string() })),
    }
}

async fn latest_sensor_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.count_api_call();
    match state.monitor.latest_sensor() {
        Some(snapshot) => HttpResponse::Ok().json(&*snapshot),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Push one JPEG frame into the slot. `X-Frame-Pts` carries the frame
/// identity; without it every push counts as a new frame.
async fn frame_handler(
    req: HttpRequest,
    state: web::Data<ServerState>,
    body: Bytes,
) -> HttpResponse {
    state.count_api_call();
    if body.is_empty() {
        return HttpResponse::BadRequest().body("empty frame");
    }
    let client_pts = match req.headers().get(FRAME_PTS_HEADER) {
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(pts) => Some(pts),
            None => {
                warn!("ignoring frame with unparsable {FRAME_PTS_HEADER} header");
                return HttpResponse::BadRequest().body("invalid X-Frame-Pts header");
            }
        },
        None => None,
    };
    let pts = state.frame_pts(client_pts);
    state.monitor.frame_slot().store(Frame::jpeg(pts, body.to_vec()));
    HttpResponse::Accepted().finish()
}

/// Switch the preview to `fullscreen`, `glasses` or back to the grid (any
/// other mode name).
async fn set_vision_mode_handler(
    state: web::Data<ServerState>,
    body: web::Json<VisionModeRequest>,
) -> HttpResponse {
    state.count_api_call();
    let mode = VisionMode::from_request(body.mode.as_deref().unwrap_or_default());
    let status = state.monitor.set_vision_mode(mode);
    HttpResponse::Ok().json(json!({ "status": "ok", "vision_mode": status }))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use ml_core::NullPoseModel;
    use monitor::MonitorConfig;

    use super::*;

    fn state(dir: &std::path::Path) -> web::Data<ServerState> {
        let monitor = Monitor::new(MonitorConfig::with_data_dir(dir), Arc::new(NullPoseModel))
            .unwrap();
        web::Data::new(ServerState::new(Arc::new(monitor)))
    }

    #[actix_web::test]
    async fn status_reports_offline_before_any_frame() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(App::new().configure(routes(state(dir.path())))).await;
        let req = test::TestRequest::get().uri("/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stream_status"], "Offline");
        assert_eq!(body["recording"], false);
    }

    #[actix_web::test]
    async fn sensor_messages_are_ingested_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(App::new().configure(routes(state(dir.path())))).await;

        let req = test::TestRequest::get().uri("/sensor/latest").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::post()
            .uri("/sensor")
            .set_json(json!({"values": vec![1; 66], "current_position": {"x": 1, "y": 2}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["row_written"], false);

        let req = test::TestRequest::get().uri("/sensor/latest").to_request();
        let latest: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(latest["values"].as_array().map(Vec::len), Some(15));
    }

    #[actix_web::test]
    async fn recording_endpoints_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(App::new().configure(routes(state(dir.path())))).await;

        let stop = || test::TestRequest::post().uri("/stop-recording").to_request();
        let start = || test::TestRequest::post().uri("/start-recording").to_request();

        let body: Value = test::call_and_read_body_json(&app, stop()).await;
        assert_eq!(body["status"], "not recording");
        let body: Value = test::call_and_read_body_json(&app, start()).await;
        assert_eq!(body["status"], "recording started");
        assert!(body["filename"].as_str().unwrap().starts_with("recorded_video_"));
        let body: Value = test::call_and_read_body_json(&app, start()).await;
        assert_eq!(body["status"], "already recording");
        let body: Value = test::call_and_read_body_json(&app, stop()).await;
        assert_eq!(body["status"], "recording stopped");
    }

    #[actix_web::test]
    async fn pushed_frames_land_in_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = test::init_service(App::new().configure(routes(state.clone()))).await;

        let req = test::TestRequest::post()
            .uri("/frame")
            .insert_header(("X-Frame-Pts", "42"))
            .set_payload(vec![0xFF, 0xD8, 0xFF, 0xD9])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        assert_eq!(state.monitor.frame_slot().latest().map(|f| f.pts), Some(42));

        let req = test::TestRequest::post()
            .uri("/frame")
            .insert_header(("X-Frame-Pts", "soon"))
            .set_payload(vec![1, 2, 3])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn generated_pts_never_reuse_a_client_pts() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = test::init_service(App::new().configure(routes(state.clone()))).await;
        let push = |pts: Option<&str>| {
            let mut req = test::TestRequest::post()
                .uri("/frame")
                .set_payload(vec![0xFF, 0xD8, 0xFF, 0xD9]);
            if let Some(pts) = pts {
                req = req.insert_header(("X-Frame-Pts", pts));
            }
            req.to_request()
        };
        let latest_pts = || state.monitor.frame_slot().latest().map(|f| f.pts);

        test::call_service(&app, push(None)).await;
        assert_eq!(latest_pts(), Some(0));
        test::call_service(&app, push(Some("1"))).await;
        test::call_service(&app, push(None)).await;
        assert_eq!(latest_pts(), Some(2));

        test::call_service(&app, push(Some("40"))).await;
        test::call_service(&app, push(Some("7"))).await;
        test::call_service(&app, push(None)).await;
        assert_eq!(latest_pts(), Some(41));
    }

    #[actix_web::test]
    async fn vision_mode_can_be_switched_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = test::init_service(App::new().configure(routes(state.clone()))).await;
        let set = |mode: &str| {
            test::TestRequest::post()
                .uri("/set-vision-mode")
                .set_json(json!({ "mode": mode }))
                .to_request()
        };

        let body: Value = test::call_and_read_body_json(&app, set("glasses")).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["vision_mode"]["mode"], "glasses");
        assert_eq!(body["vision_mode"]["glasses"], true);
        assert_eq!(state.monitor.status().vision_mode, VisionMode::Glasses);

        let body: Value = test::call_and_read_body_json(&app, set("off")).await;
        assert_eq!(body["vision_mode"]["mode"], "grid");
        assert_eq!(body["vision_mode"]["fullscreen"], false);
    }

    #[actix_web::test]
    async fn api_calls_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = test::init_service(App::new().configure(routes(state.clone()))).await;
        for uri in ["/status", "/sensor/latest", "/status"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["http_api_calls"], 4);
        assert_eq!(body["stream_connections"], 0);
    }

    #[actix_web::test]
    async fn metrics_are_served_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(App::new().configure(routes(state(dir.path())))).await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["frames_processed"], 0);
        assert_eq!(body["stream_live_seconds"], 0.0);
    }
}
