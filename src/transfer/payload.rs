use serde::{Deserialize, Serialize};

use crate::avatar::AvatarMetadata;
use crate::error::ShareError;

/// The self-describing body sent to the headset: raw model bytes (base64
/// on the wire) plus the avatar's metadata record. Built fresh for every
/// transfer attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharePayload {
    #[serde(rename = "vrm", with = "base64_bytes")]
    pub model: Vec<u8>,
    #[serde(rename = "metadata")]
    pub metadata: AvatarMetadata,
}

impl SharePayload {
    pub fn new(model: Vec<u8>, metadata: AvatarMetadata) -> Self {
        Self { model, metadata }
    }

    /// Encode to the exact bytes written as the HTTP response body.
    pub fn encode(&self) -> Result<Vec<u8>, ShareError> {
        serde_json::to_vec(self)
            .map_err(|err| ShareError::Validation(format!("payload not serializable: {}", err)))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}
