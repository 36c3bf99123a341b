// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outbound envelope for one segmented event. The hash is the lowercase hex
/// SHA-256 of the event text and is carried for downstream dedup only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishableEvent {
    #[serde(rename = "Event")]
    pub event: String,
    #[serde(rename = "Hash")]
    pub hash: String,
}

impl PublishableEvent {
    pub fn new(event: String) -> Self {
        let hash = hex::encode(Sha256::digest(event.as_bytes()));
        Self { event, hash }
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
