use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use log::{debug, error, info};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::payload::SharePayload;
use crate::error::ShareError;

/// Well-known port the headset app connects to.
pub const SHARE_PORT: u16 = 8080;
/// Path prefix dedicated to avatar sharing.
pub const SHARE_PATH: &str = "/vrmShare/";
/// Header carrying the peer's copy of the session auth code.
pub const AUTH_HEADER: &str = "x-auth-code";
/// How long the listener waits for the one inbound peer.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60 * 10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub accept_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: SHARE_PORT,
            accept_timeout: ACCEPT_TIMEOUT,
        }
    }
}

/// Non-terminal phases of one share attempt, logged as the session moves
/// through them. Terminal states are the `Result` of [`ActiveSession::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validating,
    ListenerStarting,
    Listening,
}

/// What the one accepted request amounted to. Reported by the HTTP handler
/// to the waiting session.
#[derive(Debug)]
enum PeerOutcome {
    Sent,
    AuthMismatch { received: String },
}

/// Shared state behind the share route.
#[derive(Clone)]
struct ShareState {
    auth_code: Arc<String>,
    body: Bytes,
    /// Single-flight claim: the first inbound request takes the sender,
    /// later ones are turned away.
    slot: Arc<Mutex<Option<oneshot::Sender<PeerOutcome>>>>,
}

/// One end-to-end attempt to send the current avatar to a peer device.
/// Consumed by [`TransferSession::start`]; every attempt rebuilds its
/// listeners from scratch.
pub struct TransferSession {
    addresses: Vec<Ipv4Addr>,
    auth_code: String,
    payload: SharePayload,
    config: SessionConfig,
}

impl TransferSession {
    pub fn new(
        addresses: Vec<Ipv4Addr>,
        auth_code: String,
        payload: SharePayload,
        config: SessionConfig,
    ) -> Self {
        Self {
            addresses,
            auth_code,
            payload,
            config,
        }
    }

    /// Validate preconditions and bind a listener on every discovered
    /// address. No listener is ever opened when validation fails.
    pub async fn start(self) -> Result<ActiveSession, ShareError> {
        debug!("Session phase: {:?}", Phase::Validating);
        if self.payload.model.is_empty() || self.payload.metadata.id.is_empty() {
            return Err(ShareError::Precondition(
                "avatar is not export-ready".to_string(),
            ));
        }
        if self.addresses.is_empty() {
            return Err(ShareError::Precondition(
                "no usable network address".to_string(),
            ));
        }

        let body = Bytes::from(self.payload.encode()?);
        let (peer_tx, peer_rx) = oneshot::channel();
        let state = ShareState {
            auth_code: Arc::new(self.auth_code),
            body,
            slot: Arc::new(Mutex::new(Some(peer_tx))),
        };
        let app = Router::new()
            .route(SHARE_PATH, any(serve_share))
            .with_state(state);

        debug!("Session phase: {:?}", Phase::ListenerStarting);
        let stop = CancellationToken::new();
        let mut servers = JoinSet::new();
        let mut bound = Vec::new();
        for ip in &self.addresses {
            let addr = SocketAddr::from((*ip, self.config.port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|err| ShareError::Network(format!("failed to bind {}: {}", addr, err)))?;
            bound.push(
                listener
                    .local_addr()
                    .map_err(|err| ShareError::Network(format!("no local addr: {}", err)))?,
            );

            let app = app.clone();
            let stop = stop.clone();
            servers.spawn(async move {
                if let Err(err) = axum::serve(listener, app)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
                {
                    error!("Share listener failed: {}", err);
                }
            });
        }

        info!("Share listeners started on {:?} under {}", bound, SHARE_PATH);
        Ok(ActiveSession {
            bound,
            peer: peer_rx,
            stop,
            servers,
            accept_timeout: self.config.accept_timeout,
        })
    }
}

/// A session with live listeners, waiting for its one peer.
pub struct ActiveSession {
    bound: Vec<SocketAddr>,
    peer: oneshot::Receiver<PeerOutcome>,
    stop: CancellationToken,
    servers: JoinSet<()>,
    accept_timeout: Duration,
}

impl ActiveSession {
    /// Addresses the listeners actually bound to.
    pub fn bound_addrs(&self) -> &[SocketAddr] {
        &self.bound
    }

    /// Block until the one inbound request resolves, the window elapses, or
    /// `cancel` fires — whichever happens first. Cancellation takes
    /// precedence over the timeout. Listeners are always stopped before
    /// returning, whichever terminal state was reached.
    pub async fn wait(mut self, cancel: CancellationToken) -> Result<(), ShareError> {
        debug!("Session phase: {:?}", Phase::Listening);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Share cancelled by caller, aborting listeners.");
                Err(ShareError::Cancelled)
            }
            _ = tokio::time::sleep(self.accept_timeout) => {
                info!("No peer connected within the sharing window.");
                Err(ShareError::Timeout)
            }
            peer = &mut self.peer => match peer {
                Ok(PeerOutcome::Sent) => {
                    info!("Payload sent to peer.");
                    Ok(())
                }
                Ok(PeerOutcome::AuthMismatch { received }) => {
                    info!(
                        "Received auth code ('{}') does not match the session code.",
                        received
                    );
                    Err(ShareError::AuthMismatch)
                }
                Err(_) => Err(ShareError::Network(
                    "share listeners stopped unexpectedly".to_string(),
                )),
            },
        };

        self.stop.cancel();
        match &result {
            // Drain gracefully so the in-flight response (payload or the
            // 401) is fully written before the listeners go away.
            Ok(()) | Err(ShareError::AuthMismatch) => {
                while self.servers.join_next().await.is_some() {}
            }
            // Cancellation and timeout tear the listeners down outright.
            _ => self.servers.abort_all(),
        }

        result
    }
}

/// The one share route. First request claims the session; the auth header
/// is matched case-insensitively against the session code.
async fn serve_share(State(state): State<ShareState>, headers: HeaderMap) -> Response {
    let claimed = state
        .slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    let Some(reply) = claimed else {
        debug!("Turning away request: session already claimed.");
        return StatusCode::GONE.into_response();
    };

    info!("Authenticating inbound peer.");
    let received = headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .trim();
    if received.is_empty() || !received.eq_ignore_ascii_case(&state.auth_code) {
        let _ = reply.send(PeerOutcome::AuthMismatch {
            received: received.to_string(),
        });
        return StatusCode::UNAUTHORIZED.into_response();
    }

    info!("Auth code accepted, sending payload ({} bytes).", state.body.len());
    let _ = reply.send(PeerOutcome::Sent);
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.body.clone(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::{AvatarKind, AvatarMetadata};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    fn test_session(model: &[u8], auth_code: &str, accept_timeout: Duration) -> TransferSession {
        TransferSession::new(
            vec![Ipv4Addr::LOCALHOST],
            auth_code.to_string(),
            SharePayload::new(
                model.to_vec(),
                AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody),
            ),
            SessionConfig {
                port: 0, // Use a random port
                accept_timeout,
            },
        )
    }

    fn share_url(active: &ActiveSession) -> String {
        format!("http://{}{}", active.bound_addrs()[0], SHARE_PATH)
    }

    #[tokio::test]
    async fn authenticated_peer_receives_payload() {
        let _ = env_logger::builder().is_test(true).try_init();

        let session = test_session(b"raw-model-bytes", "a1b2c3", Duration::from_secs(5));
        let active = session.start().await.unwrap();
        let url = share_url(&active);

        let waiter = tokio::spawn(active.wait(CancellationToken::new()));

        // Case-insensitive match: send the code uppercased.
        let response = reqwest::Client::new()
            .get(&url)
            .header("X-Auth-Code", "A1B2C3")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["metadata"]["Id"], "fox");
        assert_eq!(
            STANDARD.decode(value["vrm"].as_str().unwrap()).unwrap(),
            b"raw-model-bytes"
        );

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn mismatched_auth_code_fails_without_payload() {
        let session = test_session(b"bytes", "a1b2c3", Duration::from_secs(5));
        let active = session.start().await.unwrap();
        let url = share_url(&active);

        let waiter = tokio::spawn(active.wait(CancellationToken::new()));

        let response = reqwest::Client::new()
            .get(&url)
            .header("X-Auth-Code", "wrong1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(response.bytes().await.unwrap().is_empty());

        assert!(matches!(
            waiter.await.unwrap(),
            Err(ShareError::AuthMismatch)
        ));
    }

    #[tokio::test]
    async fn missing_auth_header_counts_as_mismatch() {
        let session = test_session(b"bytes", "a1b2c3", Duration::from_secs(5));
        let active = session.start().await.unwrap();
        let url = share_url(&active);

        let waiter = tokio::spawn(active.wait(CancellationToken::new()));

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 401);

        assert!(matches!(
            waiter.await.unwrap(),
            Err(ShareError::AuthMismatch)
        ));
    }

    #[tokio::test]
    async fn no_peer_within_window_times_out() {
        let session = test_session(b"bytes", "a1b2c3", Duration::from_millis(100));
        let active = session.start().await.unwrap();

        assert!(matches!(
            active.wait(CancellationToken::new()).await,
            Err(ShareError::Timeout)
        ));
    }

    #[tokio::test]
    async fn cancellation_wins_over_timeout() {
        let session = test_session(b"bytes", "a1b2c3", Duration::from_secs(30));
        let active = session.start().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        // Both a cancelled token and (eventually) the deadline are wired to
        // the same wait; cancellation must be the reported reason.
        assert!(matches!(
            active.wait(cancel).await,
            Err(ShareError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn not_export_ready_never_opens_a_listener() {
        let session = test_session(b"", "a1b2c3", Duration::from_secs(5));
        assert!(matches!(
            session.start().await,
            Err(ShareError::Precondition(_))
        ));

        let session = TransferSession::new(
            vec![Ipv4Addr::LOCALHOST],
            "a1b2c3".to_string(),
            SharePayload::new(b"bytes".to_vec(), AvatarMetadata::default()),
            SessionConfig {
                port: 0,
                accept_timeout: Duration::from_secs(5),
            },
        );
        assert!(matches!(
            session.start().await,
            Err(ShareError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn no_addresses_is_a_precondition_failure() {
        let session = TransferSession::new(
            Vec::new(),
            "a1b2c3".to_string(),
            SharePayload::new(
                b"bytes".to_vec(),
                AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody),
            ),
            SessionConfig::default(),
        );
        assert!(matches!(
            session.start().await,
            Err(ShareError::Precondition(_))
        ));
    }
}
