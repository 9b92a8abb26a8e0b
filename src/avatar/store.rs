use chrono::Local;
use log::{debug, info};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::AvatarMetadata;
use crate::dialog::{Dialog, Options, Outcome};
use crate::error::ShareError;

const MODEL_FILE: &str = "model.vrm";
const METADATA_FILE: &str = "metadata.json";

/// How a save attempt ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Saved,
    /// An avatar with the same id already existed and the user declined to
    /// overwrite it; nothing on disk was touched.
    Declined,
}

/// Write the avatar to `<root>/<id>/` as `model.vrm` + `metadata.json`.
///
/// If the directory already exists, the user is asked for overwrite
/// confirmation first, with the existing record's id and timestamps when
/// they can be read. Overwrite is delete-then-recreate. Every write races
/// the cancellation token.
pub async fn save_avatar(
    root: &Path,
    model: &[u8],
    metadata: &AvatarMetadata,
    dialog: &Dialog,
    token: &CancellationToken,
) -> Result<SaveResult, ShareError> {
    let directory = root.join(&metadata.id);

    if directory.exists() {
        info!("Found existing avatar directory: {}", directory.display());
        let details = match AvatarMetadata::read_from_file(&directory.join(METADATA_FILE)).await {
            Ok(existing) => format!(
                "ID: {}\nCreated at: {}\nLast update: {}",
                existing.id,
                existing.created_at.with_timezone(&Local).format("%c"),
                existing.updated_at.with_timezone(&Local).format("%c"),
            ),
            Err(err) => {
                debug!("Existing metadata unreadable: {}", err);
                "(model metadata could not be loaded)".to_string()
            }
        };

        let choice = dialog
            .show(
                format!("Found existing avatar, override?\n{}", details),
                Options::BOTH,
                token,
            )
            .await?;
        if choice != Outcome::Confirm {
            info!("User declined overwrite.");
            return Ok(SaveResult::Declined);
        }

        debug!("Deleting existing directory.");
        cancellable(token, tokio::fs::remove_dir_all(&directory)).await?;
    }

    debug!("Writing avatar data to {}", directory.display());
    cancellable(token, tokio::fs::create_dir_all(&directory)).await?;
    cancellable(token, tokio::fs::write(directory.join(MODEL_FILE), model)).await?;

    let metadata_json = serde_json::to_vec(metadata)
        .map_err(|err| ShareError::Validation(format!("metadata not serializable: {}", err)))?;
    cancellable(
        token,
        tokio::fs::write(directory.join(METADATA_FILE), metadata_json),
    )
    .await?;

    info!("Avatar saved.");
    Ok(SaveResult::Saved)
}

/// Race an IO future against the cancellation token.
async fn cancellable<T>(
    token: &CancellationToken,
    io: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T, ShareError> {
    tokio::select! {
        _ = token.cancelled() => Err(ShareError::Cancelled),
        result = io => Ok(result?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::AvatarKind;
    use crate::dialog::testing::auto_dialog;
    use tempfile::tempdir;

    async fn seed_existing(root: &Path, id: &str, model: &[u8]) {
        let dir = root.join(id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(MODEL_FILE), model).await.unwrap();
        let metadata = AvatarMetadata::new(id, AvatarKind::HumanoidFullBody);
        tokio::fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_vec(&metadata).unwrap(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fresh_save_writes_both_files_without_prompt() {
        let root = tempdir().unwrap();
        let metadata = AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody);
        let (dialog, mut shown) = auto_dialog(Outcome::Cancel);

        let result = save_avatar(
            root.path(),
            b"model-bytes",
            &metadata,
            &dialog,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, SaveResult::Saved);
        assert!(shown.try_recv().is_err(), "no prompt expected");

        let written = tokio::fs::read(root.path().join("fox").join(MODEL_FILE))
            .await
            .unwrap();
        assert_eq!(written, b"model-bytes");

        let read_back =
            AvatarMetadata::read_from_file(&root.path().join("fox").join(METADATA_FILE))
                .await
                .unwrap();
        assert_eq!(read_back, metadata);
    }

    #[tokio::test]
    async fn declined_overwrite_leaves_files_untouched() {
        let root = tempdir().unwrap();
        seed_existing(root.path(), "fox", b"original").await;
        let original_metadata =
            tokio::fs::read(root.path().join("fox").join(METADATA_FILE))
                .await
                .unwrap();

        let metadata = AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody);
        let (dialog, mut shown) = auto_dialog(Outcome::Cancel);

        let result = save_avatar(
            root.path(),
            b"replacement",
            &metadata,
            &dialog,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, SaveResult::Declined);

        let text = shown.recv().await.unwrap();
        assert!(text.contains("Found existing avatar"));
        assert!(text.contains("ID: fox"));

        let model = tokio::fs::read(root.path().join("fox").join(MODEL_FILE))
            .await
            .unwrap();
        assert_eq!(model, b"original");
        let metadata_bytes = tokio::fs::read(root.path().join("fox").join(METADATA_FILE))
            .await
            .unwrap();
        assert_eq!(metadata_bytes, original_metadata);
    }

    #[tokio::test]
    async fn confirmed_overwrite_replaces_both_files() {
        let root = tempdir().unwrap();
        seed_existing(root.path(), "fox", b"original").await;

        let metadata = AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody);
        let (dialog, _shown) = auto_dialog(Outcome::Confirm);

        let result = save_avatar(
            root.path(),
            b"replacement",
            &metadata,
            &dialog,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, SaveResult::Saved);

        let model = tokio::fs::read(root.path().join("fox").join(MODEL_FILE))
            .await
            .unwrap();
        assert_eq!(model, b"replacement");
        let read_back =
            AvatarMetadata::read_from_file(&root.path().join("fox").join(METADATA_FILE))
                .await
                .unwrap();
        assert_eq!(read_back, metadata);
    }

    #[tokio::test]
    async fn cancelled_save_reraises() {
        let root = tempdir().unwrap();
        let metadata = AvatarMetadata::new("fox", AvatarKind::HumanoidFullBody);
        let (dialog, _shown) = auto_dialog(Outcome::Confirm);

        let token = CancellationToken::new();
        token.cancel();

        let result = save_avatar(root.path(), b"bytes", &metadata, &dialog, &token).await;
        assert!(matches!(result, Err(ShareError::Cancelled)));
    }
}
