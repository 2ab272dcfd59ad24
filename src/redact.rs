//! Redaction and transform engine — raw message to normalized record
//!
//! Validates a raw message against the required-field set, masks PII
//! fields with a one-way hash, and produces a [`NormalizedRecord`].
//! Pure functions only — no I/O happens here; callers route failures
//! to the error sink.

use crate::error::{IngestError, Result};
use crate::types::{NormalizedRecord, RawMessage};
use chrono::Utc;
use sha2::{Digest, Sha256};

/// Fields every login-event message must carry
pub const REQUIRED_FIELDS: [&str; 6] = [
    "device_id",
    "ip",
    "user_id",
    "device_type",
    "app_version",
    "locale",
];

/// Mask a PII value with a SHA-256 hex digest
///
/// Deterministic: equal inputs produce equal digests, so downstream
/// deduplication on masked values still works. Output is 64 lowercase
/// hex characters; the original value is unrecoverable.
pub fn hash_pii(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)
}

/// Transform a raw message into a normalized, redacted record
///
/// Fails with [`IngestError::MissingFields`] when any required key is
/// absent, or [`IngestError::Transform`] when a field has an unexpected
/// shape. `create_date` is the current UTC calendar date at call time;
/// any date-like field in the message is ignored.
pub fn transform(raw: &RawMessage) -> Result<NormalizedRecord> {
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !raw.contains_key(**field))
        .map(|field| field.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(IngestError::MissingFields { fields: missing });
    }

    Ok(NormalizedRecord {
        user_id: field_str(raw, "user_id")?.to_string(),
        device_type: field_str(raw, "device_type")?.to_string(),
        masked_ip: hash_pii(field_str(raw, "ip")?),
        masked_device_id: hash_pii(field_str(raw, "device_id")?),
        locale: field_str(raw, "locale")?.to_string(),
        // Kept as text: versions arrive in dotted n.n.n form
        app_version: field_str(raw, "app_version")?.to_string(),
        create_date: Utc::now().date_naive(),
    })
}

/// Extract a required field as a string slice
fn field_str<'a>(raw: &'a RawMessage, field: &str) -> Result<&'a str> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| IngestError::Transform {
            reason: format!("field '{}' is not a string", field),
        })
}
