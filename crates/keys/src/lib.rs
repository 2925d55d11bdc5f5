//! Actor key material and HTTP signature primitives.
//!
//! Local actors carry an Ed25519 key pair by default; RSA is generated
//! instead when Mastodon compatibility is requested. Private keys are
//! persisted as PKCS#8 PEM in out-of-band item metadata; public keys are
//! served inline on the actor document.

pub mod error;
pub mod httpsig;
pub mod key;

pub use error::{KeyError, KeyResult};
pub use httpsig::{SignatureParams, build_signing_string, parse_signature_header};
pub use key::{KeyType, PrivateKey, PublicKey};
