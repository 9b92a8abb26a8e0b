pub mod loader;
pub mod store;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;

use crate::error::ShareError;

pub use loader::AvatarLoader;

/// Kind of avatar model, integer-valued on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvatarKind {
    #[default]
    Unspecified = 0,
    HumanoidFullBody = 1,
}

impl Serialize for AvatarKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for AvatarKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(AvatarKind::Unspecified),
            1 => Ok(AvatarKind::HumanoidFullBody),
            other => Err(D::Error::custom(format!("unknown avatar kind {}", other))),
        }
    }
}

/// Metadata record for a loaded avatar. Default (empty id) until an avatar
/// finishes loading; replaced wholesale on load; reset on clear.
///
/// The JSON field names match the headset app's expectations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AvatarMetadata {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: AvatarKind,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl AvatarMetadata {
    /// Fresh metadata for an avatar identified by `id`, stamped now.
    pub fn new(id: impl Into<String>, kind: AvatarKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a `metadata.json` file.
    pub async fn read_from_file(path: &Path) -> Result<AvatarMetadata, ShareError> {
        let raw = tokio::fs::read(path).await?;
        serde_json::from_slice(&raw)
            .map_err(|err| ShareError::Validation(format!("bad metadata file: {}", err)))
    }
}

/// Events published by the avatar loader.
#[derive(Debug, Clone)]
pub enum AvatarEvent {
    /// Metadata for the avatar being loaded is known.
    MetadataLoaded(AvatarMetadata),
    /// The raw model bytes finished loading.
    Loaded(Arc<Vec<u8>>),
    /// The loaded avatar was discarded; subscribers reset their state.
    Cleared,
}
