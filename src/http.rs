//! HTTP listener accepting backend registrations.
//!
//! ```text
//! POST /register
//!   secret:  <shared secret>
//!   backend: <backend name>
//! ```
//!
//! The registered address is the TCP peer address of the request.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{DnsError, RegisterError};
use crate::register::RegistrationService;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "secret";
/// Header carrying the backend name.
pub const BACKEND_HEADER: &str = "backend";
/// Path of the registration endpoint.
pub const REGISTER_PATH: &str = "/register";

impl RegisterError {
    /// HTTP status reported for this rejection.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegisterError::MissingSecret => StatusCode::UNAUTHORIZED,
            RegisterError::InvalidSecret => StatusCode::FORBIDDEN,
            RegisterError::MissingBackend => StatusCode::BAD_REQUEST,
            RegisterError::InvalidAddress(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegisterError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

/// Build the registration router.
pub fn router(service: RegistrationService) -> Router {
    Router::new()
        .route(REGISTER_PATH, post(handle_register))
        .with_state(service)
}

async fn handle_register(
    State(service): State<RegistrationService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<StatusCode, RegisterError> {
    let secret = headers.get(SECRET_HEADER).map(|value| value.as_bytes());
    let backend = header_str(&headers, BACKEND_HEADER);

    let address = service.register(secret, backend, &peer.to_string())?;
    debug!(%address, "registration accepted");
    Ok(StatusCode::OK)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Serve registrations on `listener` until `shutdown` resolves.
///
/// On shutdown the listener stops accepting connections and in-flight
/// requests get `grace` to finish before the server is aborted.
pub async fn serve<F>(
    listener: TcpListener,
    service: RegistrationService,
    shutdown: F,
    grace: Duration,
) -> Result<(), DnsError>
where
    F: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr()?;
    let app = router(service).into_make_service_with_connect_info::<SocketAddr>();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    info!(addr = %local_addr, "registration listener ready");

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(DnsError::Io(e)),
                Err(e) => {
                    error!("registration listener task failed: {}", e);
                    Ok(())
                }
            };
        }
        _ = shutdown => {
            info!("registration listener shutdown requested");
        }
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => {
            info!("registration listener stopped");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(DnsError::Io(e)),
        Ok(Err(e)) => {
            error!("registration listener task failed: {}", e);
            Ok(())
        }
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs_f64(),
                "registration listener did not drain in time, closing forcibly"
            );
            server.abort();
            Ok(())
        }
    }
}
