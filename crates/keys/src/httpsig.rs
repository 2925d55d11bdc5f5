//! HTTP signature primitives (draft-cavage style).
//!
//! Inbound server-to-server requests carry a `Signature` header naming the
//! signing actor's key. Verification walks the signed header list, rebuilds
//! the signing string, and checks it against the actor's public key; the
//! `Digest` header, when present, must match the body, and the `Date` header
//! must be within the permitted skew.

use crate::error::{KeyError, KeyResult};
use crate::key::{PrivateKey, PublicKey};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use http::{HeaderMap, Method, Uri};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Parsed contents of a `Signature` header.
#[derive(Debug)]
pub struct SignatureParams {
    /// IRI of the signing key, usually `<actor>#main-key`.
    pub key_id: String,
    /// Declared algorithm, if any.
    pub algorithm: Option<String>,
    /// Lower-cased names of the signed headers, in order.
    pub headers: Vec<String>,
    /// The raw signature bytes.
    pub signature: Vec<u8>,
}

impl SignatureParams {
    /// The actor IRI the key belongs to (the key id without its fragment).
    pub fn actor_iri(&self) -> &str {
        self.key_id.split('#').next().unwrap_or(&self.key_id)
    }
}

/// Parse a `Signature` header of the form
/// `keyId="...",algorithm="...",headers="(request-target) host date",signature="..."`.
pub fn parse_signature_header(value: &str) -> KeyResult<SignatureParams> {
    let mut map = HashMap::<String, String>::new();
    for part in value.split(',') {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        map.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
    }

    let key_id = map
        .get("keyId")
        .cloned()
        .ok_or_else(|| KeyError::MalformedHeader("missing keyId".to_string()))?;
    let headers = map
        .get("headers")
        .cloned()
        .unwrap_or_else(|| "date".to_string());
    let signature_b64 = map
        .get("signature")
        .ok_or_else(|| KeyError::MalformedHeader("missing signature".to_string()))?;
    let signature = B64
        .decode(signature_b64.as_bytes())
        .map_err(|e| KeyError::MalformedHeader(format!("signature not base64: {e}")))?;

    Ok(SignatureParams {
        key_id,
        algorithm: map.get("algorithm").cloned(),
        headers: headers
            .split_whitespace()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        signature,
    })
}

/// Rebuild the signing string for the given signed header list.
pub fn build_signing_string(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
) -> KeyResult<String> {
    let mut out = String::new();
    for (i, name) in signed_headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if name == "(request-target)" {
            let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            out.push_str("(request-target): ");
            out.push_str(&method.as_str().to_ascii_lowercase());
            out.push(' ');
            out.push_str(uri.path());
            out.push_str(&query);
            continue;
        }
        let header_name = http::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| KeyError::MalformedHeader(format!("bad header name: {name}")))?;
        let value = headers
            .get(&header_name)
            .ok_or_else(|| KeyError::MissingHeader(name.clone()))?
            .to_str()
            .map_err(|_| KeyError::MalformedHeader(format!("non-ascii value for {name}")))?;
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value.trim());
    }
    Ok(out)
}

/// Check the `Digest` header against the body, when one is present.
pub fn verify_digest_if_present(headers: &HeaderMap, body: &[u8]) -> KeyResult<()> {
    let Some(digest) = headers.get("digest") else {
        return Ok(());
    };
    let digest = digest
        .to_str()
        .map_err(|_| KeyError::MalformedHeader("Digest not ascii".to_string()))?;
    let Some((alg, value)) = digest.split_once('=') else {
        return Err(KeyError::MalformedHeader("invalid Digest header".to_string()));
    };
    if !alg.trim().eq_ignore_ascii_case("SHA-256") {
        return Err(KeyError::UnsupportedAlgorithm(alg.trim().to_string()));
    }
    let expected = B64
        .decode(value.trim().as_bytes())
        .map_err(|e| KeyError::MalformedHeader(format!("digest not base64: {e}")))?;
    if expected.as_slice() != Sha256::digest(body).as_slice() {
        return Err(KeyError::DigestMismatch);
    }
    Ok(())
}

/// Check the `Date` header against the clock, bounded by `max_skew`.
pub fn verify_date(headers: &HeaderMap, max_skew: Duration) -> KeyResult<()> {
    let date = headers
        .get("date")
        .ok_or_else(|| KeyError::MissingHeader("date".to_string()))?
        .to_str()
        .map_err(|_| KeyError::MalformedHeader("Date not ascii".to_string()))?;
    let ts = httpdate::parse_http_date(date)
        .map_err(|e| KeyError::MalformedHeader(format!("bad Date: {e}")))?;
    let now = SystemTime::now();
    let diff = now
        .duration_since(ts)
        .or_else(|_| ts.duration_since(now))
        .unwrap_or_default();
    if diff > max_skew {
        return Err(KeyError::DateSkew(diff.as_secs()));
    }
    Ok(())
}

/// Verify an inbound request signature against the signer's public key.
pub fn verify_request(
    public_key: &PublicKey,
    params: &SignatureParams,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> KeyResult<()> {
    let signing_string = build_signing_string(method, uri, headers, &params.headers)?;
    public_key.verify(signing_string.as_bytes(), &params.signature)
}

/// Sign an outbound request, inserting `Date`, `Digest`, `Host`, and
/// `Signature` headers as needed.
pub fn sign_request(
    key: &PrivateKey,
    key_id: &str,
    method: &Method,
    uri: &Uri,
    headers: &mut HeaderMap,
    body: &[u8],
) -> KeyResult<()> {
    if !headers.contains_key("date") {
        let date = httpdate::fmt_http_date(SystemTime::now());
        headers.insert(
            "date",
            date.parse()
                .map_err(|_| KeyError::MalformedHeader("Date".to_string()))?,
        );
    }
    if !headers.contains_key("host") {
        if let Some(authority) = uri.authority() {
            headers.insert(
                "host",
                authority
                    .as_str()
                    .parse()
                    .map_err(|_| KeyError::MalformedHeader("Host".to_string()))?,
            );
        }
    }
    if !body.is_empty() && !headers.contains_key("digest") {
        let digest = B64.encode(Sha256::digest(body));
        headers.insert(
            "digest",
            format!("SHA-256={digest}")
                .parse()
                .map_err(|_| KeyError::MalformedHeader("Digest".to_string()))?,
        );
    }

    let mut signed: Vec<String> = vec![
        "(request-target)".to_string(),
        "host".to_string(),
        "date".to_string(),
    ];
    if headers.contains_key("digest") {
        signed.push("digest".to_string());
    }

    let signing_string = build_signing_string(method, uri, headers, &signed)?;
    let signature = B64.encode(key.sign(signing_string.as_bytes())?);
    let algorithm = match key.key_type() {
        crate::key::KeyType::Ed25519 => "hs2019",
        crate::key::KeyType::Rsa => "rsa-sha256",
    };
    let header = format!(
        "keyId=\"{key_id}\",algorithm=\"{algorithm}\",headers=\"{}\",signature=\"{signature}\"",
        signed.join(" ")
    );
    headers.insert(
        "signature",
        header
            .parse()
            .map_err(|_| KeyError::MalformedHeader("Signature".to_string()))?,
    );
    Ok(())
}
