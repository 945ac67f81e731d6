//! Connection credentials derived from a project key triple.
//!
//! A project key has the shape `<tag>-<identity>-<secret>`, where the tag
//! is `R`, `W` or `A` for the read, write and admin keys. All three keys of
//! a triple belong to the same project and therefore share one identity.
//!
//! The handshake carries two headers:
//! - `Payload`: base64 of the canonical JSON payload
//! - `PayloadHMAC`: hex HMAC-SHA256 of that base64 text, keyed with the
//!   admin key's secret

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::CogsError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 payload.
pub const PAYLOAD_HEADER: &str = "Payload";
/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "PayloadHMAC";

// ── Keys ─────────────────────────────────────────────────────────

/// The read/write/admin key triple for one project.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandKeys {
    read: String,
    write: String,
    admin: String,
}

impl CommandKeys {
    pub fn new(
        read: impl Into<String>,
        write: impl Into<String>,
        admin: impl Into<String>,
    ) -> Self {
        Self {
            read: read.into(),
            write: write.into(),
            admin: admin.into(),
        }
    }
}

impl std::fmt::Debug for CommandKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("CommandKeys").finish_non_exhaustive()
    }
}

/// One parsed project key.
#[derive(Debug)]
struct ProjectKey<'a> {
    identity: &'a str,
    secret: &'a str,
}

fn parse_key<'a>(key: &'a str, tag: &str, slot: &str) -> Result<ProjectKey<'a>, CogsError> {
    let mut parts = key.split('-');
    let (Some(key_tag), Some(identity), Some(secret), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CogsError::InvalidKeyFormat(format!(
            "{slot} key must have the form {tag}-<identity>-<secret>"
        )));
    };
    if key_tag != tag {
        return Err(CogsError::InvalidKeyFormat(format!(
            "{slot} key must start with '{tag}-'"
        )));
    }
    if identity.is_empty() || secret.is_empty() {
        return Err(CogsError::InvalidKeyFormat(format!(
            "{slot} key has an empty identity or secret"
        )));
    }
    Ok(ProjectKey { identity, secret })
}

// ── Credentials ──────────────────────────────────────────────────

#[derive(Serialize)]
struct AuthPayload<'a> {
    identity: &'a str,
    permissions: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_uuid: Option<&'a str>,
}

/// Handshake credentials: the encoded payload and its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub payload: String,
    pub signature: String,
}

impl Credentials {
    /// The headers to attach to the transport handshake.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            (PAYLOAD_HEADER.to_string(), self.payload.clone()),
            (SIGNATURE_HEADER.to_string(), self.signature.clone()),
        ]
    }
}

/// Derive handshake credentials for `keys`, optionally asking the service
/// to restore `session_id`.
///
/// Deterministic: identical inputs always produce identical credentials.
pub fn authenticate(keys: &CommandKeys, session_id: Option<&str>) -> Result<Credentials, CogsError> {
    let read = parse_key(&keys.read, "R", "read")?;
    let write = parse_key(&keys.write, "W", "write")?;
    let admin = parse_key(&keys.admin, "A", "admin")?;

    if read.identity != write.identity || read.identity != admin.identity {
        return Err(CogsError::InvalidKeyFormat(
            "keys belong to different projects".into(),
        ));
    }

    let json = serde_json::to_vec(&AuthPayload {
        identity: read.identity,
        permissions: "RWA",
        session_uuid: session_id,
    })?;
    let payload = base64::engine::general_purpose::STANDARD.encode(json);

    let mut mac = HmacSha256::new_from_slice(admin.secret.as_bytes())
        .map_err(|e| CogsError::InvalidKeyFormat(e.to_string()))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(Credentials { payload, signature })
}

// ── Tests ────────────────────────────────────────────────────────
