use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{AvatarEvent, AvatarKind, AvatarMetadata};
use crate::dialog::{Dialog, Options, Outcome};
use crate::error::ShareError;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Loads `.vrm` model files and publishes avatar events. Owns the event
/// channel; subscribers register through [`AvatarLoader::subscribe`].
pub struct AvatarLoader {
    events: broadcast::Sender<AvatarEvent>,
    dialog: Dialog,
    loaded_file: Option<PathBuf>,
}

impl AvatarLoader {
    pub fn new(dialog: Dialog) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            dialog,
            loaded_file: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AvatarEvent> {
        self.events.subscribe()
    }

    /// Load the model at `path`, replacing any already-loaded avatar after
    /// user confirmation. IO failures resolve to a dialog notification;
    /// only cancellation is re-raised.
    pub async fn load(&mut self, path: &Path, token: &CancellationToken) -> Result<(), ShareError> {
        match self.load_inner(path, token).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                info!("Avatar load cancelled.");
                Err(err)
            }
            Err(err) => {
                error!("Failed to load avatar: {}", err);
                let _ = self
                    .dialog
                    .show(
                        "Could not load avatar, please try again.",
                        Options::CONFIRM,
                        token,
                    )
                    .await;
                Ok(())
            }
        }
    }

    async fn load_inner(&mut self, path: &Path, token: &CancellationToken) -> Result<(), ShareError> {
        if self.loaded_file.is_some() {
            debug!("An avatar is already loaded, asking for replacement.");
            let choice = self
                .dialog
                .show(
                    "Replace current avatar and reset scene?",
                    Options::BOTH,
                    token,
                )
                .await?;
            if choice != Outcome::Confirm {
                info!("User kept the current avatar.");
                return Ok(());
            }
            let _ = self.events.send(AvatarEvent::Cleared);
        }

        info!("Loading avatar model from {}", path.display());
        let data = tokio::select! {
            _ = token.cancelled() => return Err(ShareError::Cancelled),
            read = tokio::fs::read(path) => read?,
        };

        let metadata = self.resolve_metadata(path).await;
        let _ = self.events.send(AvatarEvent::MetadataLoaded(metadata));
        let _ = self.events.send(AvatarEvent::Loaded(Arc::new(data)));

        self.loaded_file = Some(path.to_path_buf());
        info!("Avatar loaded.");
        Ok(())
    }

    /// Prefer a `metadata.json` next to the model file; otherwise derive a
    /// record from the file name, stamped now.
    async fn resolve_metadata(&self, model_path: &Path) -> AvatarMetadata {
        let sibling = model_path.with_file_name("metadata.json");
        match AvatarMetadata::read_from_file(&sibling).await {
            Ok(metadata) => {
                debug!("Loaded metadata from {}", sibling.display());
                metadata
            }
            Err(err) => {
                debug!("No usable sibling metadata ({}), deriving from file name.", err);
                let id = model_path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                AvatarMetadata::new(id, AvatarKind::HumanoidFullBody)
            }
        }
    }
}
