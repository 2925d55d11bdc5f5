//! Out-of-band per-item metadata.
//!
//! Metadata is stored next to an item's raw serialization under a separate
//! well-known key and is never served. Private keys exist iff the actor was
//! locally generated.

use postbox_keys::KeyType;
use serde::{Deserialize, Serialize};

/// The per-item metadata record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// bcrypt hash of the actor's password.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pw: Option<String>,

    /// PKCS#8 PEM encoding of the actor's private key.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key: Option<String>,

    /// Algorithm tag for `private_key`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_type: Option<KeyType>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.pw.is_none() && self.private_key.is_none()
    }
}
