pub mod payload;
pub mod session;

use log::{debug, error, info, warn};
use std::env;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::avatar::{store, store::SaveResult, AvatarEvent, AvatarMetadata};
use crate::dialog::{Dialog, Options};
use crate::error::ShareError;
use crate::networking;

pub use payload::SharePayload;
pub use session::{ActiveSession, SessionConfig, TransferSession};

/// Session auth codes are short enough to type on a headset.
pub const AUTH_CODE_LENGTH: usize = 6;

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct ShareConfig {
    pub session: SessionConfig,
    /// Base directory avatar exports are written under.
    pub storage_root: PathBuf,
}

impl ShareConfig {
    /// Teacher-style env configuration with sensible defaults:
    /// `VRM_SHARE_PORT`, `VRM_SHARE_TIMEOUT_SECS`, `VRM_SHARE_STORAGE_DIR`.
    pub fn from_env() -> Self {
        let port = env::var("VRM_SHARE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(session::SHARE_PORT);

        let accept_timeout = env::var("VRM_SHARE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(session::ACCEPT_TIMEOUT);

        let storage_root = env::var("VRM_SHARE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("vrm-share")
            });

        Self {
            session: SessionConfig {
                port,
                accept_timeout,
            },
            storage_root,
        }
    }
}

/// Connection details shown to the user while sharing is in progress, for
/// manual entry on the peer device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub addresses: Vec<Ipv4Addr>,
    pub port: u16,
    pub auth_code: String,
}

impl fmt::Display for ShareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addresses: Vec<String> = self.addresses.iter().map(|ip| ip.to_string()).collect();
        write!(
            f,
            "IP Addresses: {}\nPassword: {}\nPort: {}\n\n\
             Enter these details in the companion headset app. \
             If multiple IPs are shown, use your Wi-Fi IP.",
            addresses.join(", "),
            self.auth_code,
            self.port
        )
    }
}

/// Commands the frontend sends to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareCommand {
    StartSharing,
    CancelSharing,
    SaveAvatar,
}

/// Owns the share session lifecycle: avatar state readiness, the one
/// active session slot, and user feedback through the dialog coordinator.
pub struct TransferOrchestrator {
    dialog: Dialog,
    config: ShareConfig,
    /// Generated once per orchestrator lifetime, not per attempt.
    auth_code: String,
    model: Option<Arc<Vec<u8>>>,
    metadata: AvatarMetadata,
    /// Single-slot ownership: `Some` while a session is in flight.
    active_share: Option<CancellationToken>,
    share_info: watch::Sender<Option<ShareInfo>>,
    session_done_tx: mpsc::UnboundedSender<()>,
    session_done_rx: mpsc::UnboundedReceiver<()>,
}

impl TransferOrchestrator {
    pub fn new(
        dialog: Dialog,
        config: ShareConfig,
    ) -> Result<(Self, watch::Receiver<Option<ShareInfo>>), ShareError> {
        let auth_code = networking::generate_auth_code(AUTH_CODE_LENGTH)?;
        let (share_info, share_info_rx) = watch::channel(None);
        let (session_done_tx, session_done_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                dialog,
                config,
                auth_code,
                model: None,
                metadata: AvatarMetadata::default(),
                active_share: None,
                share_info,
                session_done_tx,
                session_done_rx,
            },
            share_info_rx,
        ))
    }

    fn export_ready(&self) -> bool {
        self.model.as_ref().is_some_and(|model| !model.is_empty())
            && !self.metadata.id.is_empty()
    }

    fn apply_event(&mut self, event: AvatarEvent) {
        match event {
            AvatarEvent::MetadataLoaded(metadata) => {
                debug!("Avatar metadata updated (id: '{}').", metadata.id);
                self.metadata = metadata;
            }
            AvatarEvent::Loaded(model) => {
                debug!("Avatar model updated ({} bytes).", model.len());
                self.model = Some(model);
            }
            AvatarEvent::Cleared => {
                debug!("Avatar state cleared.");
                self.model = None;
                self.metadata = AvatarMetadata::default();
            }
        }
    }

    /// Drive the orchestrator until shutdown. Single task, single owner of
    /// all share state; long operations run on spawned tasks and report
    /// back through channels.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ShareCommand>,
        mut events: broadcast::Receiver<AvatarEvent>,
        shutdown: CancellationToken,
    ) {
        let mut events_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                // Finally-style cleanup for every terminal session state.
                _ = self.session_done_rx.recv() => {
                    debug!("Share session finished, clearing state.");
                    self.active_share = None;
                    let _ = self.share_info.send(None);
                }

                event = events.recv(), if events_open => match event {
                    Ok(event) => self.apply_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Avatar event stream lagged, missed {} event(s).", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },

                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let ended = match command {
                        ShareCommand::StartSharing => self.start_sharing(&shutdown).await,
                        ShareCommand::CancelSharing => {
                            self.cancel_sharing();
                            Ok(())
                        }
                        ShareCommand::SaveAvatar => self.save_avatar(&shutdown).await,
                    };
                    if let Err(err) = ended {
                        // Only cancellation escapes the handlers.
                        debug!("Command {:?} ended early: {}", command, err);
                    }
                }
            }
        }

        info!("Transfer orchestrator stopped.");
    }

    /// Start one share attempt. Precondition failures notify the user and
    /// never open a listener; the spawned session reports its terminal
    /// state through exactly one dialog.
    async fn start_sharing(&mut self, shutdown: &CancellationToken) -> Result<(), ShareError> {
        if self.active_share.is_some() {
            warn!("A sharing session is already active, ignoring.");
            return Ok(());
        }

        if !self.export_ready() {
            info!(
                "Avatar not in state for sharing (model loaded: {}, id: '{}').",
                self.model.is_some(),
                self.metadata.id
            );
            self.dialog
                .show(
                    "No avatar to share or avatar has not finished loading yet.",
                    Options::CONFIRM,
                    shutdown,
                )
                .await?;
            return Ok(());
        }

        let addresses = match networking::discover_share_addresses() {
            Ok(addresses) => addresses,
            Err(err) => {
                error!("Address discovery failed: {}", err);
                Vec::new()
            }
        };
        if addresses.is_empty() {
            error!("Could not get a local IP address to share over.");
            self.dialog
                .show(
                    "Could not get local IP address to start sharing data to the headset.",
                    Options::CONFIRM,
                    shutdown,
                )
                .await?;
            return Ok(());
        }

        // Payload is built fresh per attempt from the current avatar state.
        let Some(model) = &self.model else {
            return Ok(());
        };
        let payload = SharePayload::new(model.as_ref().clone(), self.metadata.clone());

        let info = ShareInfo {
            addresses: addresses.clone(),
            port: self.config.session.port,
            auth_code: self.auth_code.clone(),
        };
        let _ = self.share_info.send(Some(info));

        let cancel = shutdown.child_token();
        self.active_share = Some(cancel.clone());

        let session = TransferSession::new(
            addresses,
            self.auth_code.clone(),
            payload,
            self.config.session.clone(),
        );
        let dialog = self.dialog.clone();
        let done = self.session_done_tx.clone();
        let notify_token = shutdown.clone();

        tokio::spawn(async move {
            let result = match session.start().await {
                Ok(active) => active.wait(cancel).await,
                Err(err) => Err(err),
            };

            let message = match result {
                Ok(()) => {
                    info!("Sharing complete.");
                    "Sharing completed!"
                }
                Err(ShareError::Cancelled) => {
                    info!("Sharing cancelled.");
                    "Sharing cancelled."
                }
                Err(ShareError::Timeout) => "Operation timed out.",
                Err(ShareError::AuthMismatch) => {
                    "Received incorrect password from share target."
                }
                Err(err) => {
                    error!("Failed to share avatar: {}", err);
                    "Could not share avatar, please try again."
                }
            };
            let _ = dialog.show(message, Options::CONFIRM, &notify_token).await;

            // Always clears the in-progress state, whichever way it ended.
            let _ = done.send(());
        });

        Ok(())
    }

    fn cancel_sharing(&mut self) {
        match &self.active_share {
            Some(token) => {
                info!("Cancelling active share session.");
                token.cancel();
            }
            None => debug!("No active share session to cancel."),
        }
    }

    /// Export the current avatar to disk, prompting before overwriting an
    /// existing one. IO faults notify instead of propagating.
    async fn save_avatar(&self, shutdown: &CancellationToken) -> Result<(), ShareError> {
        if !self.export_ready() {
            info!(
                "Avatar not in state for saving (model loaded: {}, id: '{}').",
                self.model.is_some(),
                self.metadata.id
            );
            self.dialog
                .show(
                    "No avatar to save or avatar has not finished loading yet.",
                    Options::CONFIRM,
                    shutdown,
                )
                .await?;
            return Ok(());
        }
        let Some(model) = &self.model else {
            return Ok(());
        };

        match store::save_avatar(
            &self.config.storage_root,
            model,
            &self.metadata,
            &self.dialog,
            shutdown,
        )
        .await
        {
            Ok(SaveResult::Saved) => {
                self.dialog
                    .show("Model successfully saved!", Options::CONFIRM, shutdown)
                    .await?;
            }
            Ok(SaveResult::Declined) => info!("Save declined by user."),
            Err(err) if err.is_cancelled() => {
                info!("Save cancelled.");
                return Err(err);
            }
            Err(err) => {
                error!("Failed to save avatar: {}", err);
                self.dialog
                    .show(
                        "Could not save avatar, please try again.",
                        Options::CONFIRM,
                        shutdown,
                    )
                    .await?;
            }
        }

        Ok(())
    }
}
