//! Listener, middleware stack, graceful shutdown, and periodic maintenance.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use clyrdia_core::Settings;
use clyrdia_engine::{AdmissionError, AdmissionFacade, ErrorKind};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::caller::{REQUEST_ID_HEADER, request_id};
use crate::routes::{AppState, HEALTH_PATH, routes};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Room for multipart framing and text fields on top of the file itself.
const FORM_OVERHEAD: usize = 1024 * 1024;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS configuration: {reason}")]
    CorsConfig { reason: String },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

// ── Router ──

/// The full application: routes plus auth, CORS, body limit, tracing, and
/// request ids.
pub fn build_app(facade: Arc<AdmissionFacade>, settings: &Settings) -> Result<Router, ServerError> {
    let mut router = routes(AppState { facade })
        .layer(DefaultBodyLimit::max(settings.upload.max_file_size + FORM_OVERHEAD));

    if let Some(key) = settings.server.api_key.as_deref().filter(|k| !k.is_empty()) {
        let key: Arc<str> = Arc::from(key);
        router = router.layer(middleware::from_fn_with_state(key, require_api_key));
    }

    if !settings.server.cors_origins.is_empty() {
        router = router.layer(cors_layer(&settings.server.cors_origins)?);
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id(request.headers()),
            )
        })
        .on_response(|response: &Response, latency: Duration, span: &tracing::Span| {
            let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
            info!(parent: span, status = response.status().as_u16(), latency_ms, "request completed");
        })
        .on_failure(|error: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span| {
            let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
            tracing::error!(parent: span, latency_ms, error = %error, "request failed");
        });

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    Ok(router
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid::default())))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| ServerError::CorsConfig {
                reason: format!("origin `{origin}` is not a valid header value: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

/// Bearer-token guard. Health checks stay open.
async fn require_api_key(State(key): State<Arc<str>>, request: Request, next: Next) -> Response {
    if request.uri().path().ends_with(HEALTH_PATH) {
        return next.run(request).await;
    }
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(&*key) {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "rejected request with missing or invalid API key");
    let id = request_id(request.headers());
    crate::error::ApiError::from(AdmissionError::new(ErrorKind::Unauthorized, "Invalid API key"))
        .with_request_id(id)
        .into_response()
}

// ── Serving ──

pub async fn serve(settings: &Settings, facade: Arc<AdmissionFacade>) -> Result<(), ServerError> {
    let listen_addr = parse_listen_addr(&settings.server.listen_addr)?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: listen_addr.to_string(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    info!(%local_addr, environment = %settings.server.environment, "clyrdia server listening");

    let maintenance = tokio::spawn(maintain(facade.clone()));
    let app = build_app(facade, settings)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);
    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let mut server_future = Box::pin(async move {
        axum::serve(listener, make_service)
            .with_graceful_shutdown(shutdown_future)
            .await
    });
    let mut drain_timeout = Box::pin(drain_timeout_future(shutdown_rx.clone()));

    let outcome = tokio::select! {
        result = server_future.as_mut() => result.map_err(|source| ServerError::Serve { source }),
        _ = drain_timeout.as_mut() => Ok(()),
    };
    maintenance.abort();

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        info!("server stopped without external shutdown signal");
    } else {
        info!(?final_event, "server shutdown complete");
    }
    outcome
}

/// Hourly job-result sweep and a five-minute dependency probe.
pub async fn maintain(facade: Arc<AdmissionFacade>) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut probe = tokio::time::interval(HEALTH_PROBE_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let purged = facade.sweep();
                debug!(purged, "job result sweep finished");
            }
            _ = probe.tick() => {
                let report = facade.health().await;
                if !report.is_healthy() {
                    warn!(unhealthy = ?report.unhealthy_services(), "dependencies degraded");
                }
            }
        }
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }
    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn broadcast_shutdown(sender: watch::Sender<ShutdownEvent>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let event = wait_for_shutdown().await;
        if let Err(error) = sender.send(event) {
            warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_validation() {
        assert!(matches!(parse_listen_addr("  "), Err(ServerError::EmptyListenAddr)));
        assert!(matches!(
            parse_listen_addr("localhost"),
            Err(ServerError::InvalidListenAddr { .. })
        ));
        assert_eq!(
            parse_listen_addr(" 127.0.0.1:8000 ").unwrap().port(),
            8000
        );
    }

    #[test]
    fn bad_cors_origin_is_a_config_error() {
        let err = cors_layer(&["https://ok.example".into(), "bad\norigin".into()]).unwrap_err();
        assert!(matches!(err, ServerError::CorsConfig { .. }));
        assert!(cors_layer(&["*".into()]).is_ok());
    }
}
