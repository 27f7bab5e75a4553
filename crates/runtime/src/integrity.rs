//! Self-verifying snapshot artifacts.
//!
//! The checksum is SHA-256 (lowercase hex) over the compact JSON encoding of
//! the snapshot with the `checksum` field omitted.  Stamping is two-phase:
//! hash the unsigned payload, then embed the hash.  On disk an artifact is
//! exactly the compact JSON of the stamped snapshot, so any byte that does
//! not round-trip is treated as tampering even when the decoded values would
//! still hash correctly.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::snapshot::StateSnapshot;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("payload does not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0:?} artifact carries no checksum")]
    MissingChecksum(crate::snapshot::SnapshotKind),

    #[error("checksum mismatch (stored {stored}, computed {computed})")]
    Mismatch { stored: String, computed: String },

    #[error("bytes are not the canonical encoding of the decoded snapshot")]
    NonCanonical,
}

/// Compact JSON of everything except the checksum.
pub fn canonical_bytes(snapshot: &StateSnapshot) -> Result<Vec<u8>, serde_json::Error> {
    let mut unsigned = snapshot.clone();
    unsigned.checksum = None;
    serde_json::to_vec(&unsigned)
}

pub fn compute(snapshot: &StateSnapshot) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(snapshot)?);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn stamp(mut snapshot: StateSnapshot) -> Result<StateSnapshot, serde_json::Error> {
    snapshot.checksum = Some(compute(&snapshot)?);
    Ok(snapshot)
}

/// Bytes written to disk for a (normally stamped) snapshot.
pub fn encode(snapshot: &StateSnapshot) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(snapshot)
}

/// A missing checksum is a failure here regardless of kind.
pub fn verify(snapshot: &StateSnapshot) -> Result<(), IntegrityError> {
    let Some(stored) = snapshot.checksum.as_deref() else {
        return Err(IntegrityError::MissingChecksum(snapshot.kind));
    };
    let computed = compute(snapshot)?;
    if stored != computed {
        return Err(IntegrityError::Mismatch {
            stored: stored.to_string(),
            computed,
        });
    }
    Ok(())
}

/// Decode an on-disk artifact and check it end to end.
///
/// Unstamped snapshots are accepted only for kinds that do not require a
/// checksum; they must still be canonically encoded.
pub fn verify_encoded(bytes: &[u8]) -> Result<StateSnapshot, IntegrityError> {
    let snapshot: StateSnapshot = serde_json::from_slice(bytes)?;
    if encode(&snapshot)? != bytes {
        return Err(IntegrityError::NonCanonical);
    }
    if snapshot.checksum.is_some() || snapshot.kind.requires_checksum() {
        verify(&snapshot)?;
    }
    Ok(snapshot)
}
