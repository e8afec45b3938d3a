//! Ed25519 signing and validation of containers
//!
//! A signature is a JSON document binding the container's manifest root
//! digest. The signer signs the JCS encoding of the signed data; the
//! validator re-derives the manifest from the current data files, so any
//! content change after signing fails validation.

use std::fs;
use std::io;
use std::path::Path;

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::container::{Container, ContainerType};
use crate::error::Result;
use crate::signature::{ContainerValidator, Signature, SignatureService, ValidationReport};

/// Schema identifier for signature documents
pub const SIGNATURE_SCHEMA_ID: &str = "asic/signature@1";

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Errors from signing/verification operations
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

/// Result type for signing operations
pub type SigningResult<T> = std::result::Result<T, SigningError>;

/// The part of a signature document covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedData {
    pub schema_id: String,
    pub container_type: ContainerType,

    /// `root_sha256` of the manifest at signing time
    pub manifest_root_sha256: String,

    pub signed_at: DateTime<Utc>,
}

impl SignedData {
    fn canonical_bytes(&self) -> SigningResult<Vec<u8>> {
        Ok(serde_json_canonicalizer::to_vec(self)?)
    }
}

/// Signature document stored as `META-INF/signatures<N>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDocument {
    pub signed_data: SignedData,

    /// Base64-encoded Ed25519 signature over JCS(signed_data)
    pub signature: String,

    /// Always "Ed25519"
    pub signature_algorithm: String,

    /// Base64-encoded public key
    pub public_key: String,

    /// SHA-256 fingerprint of the public key (hex-encoded)
    pub pubkey_fingerprint: String,
}

impl SignatureDocument {
    pub fn sign(signed_data: SignedData, signing_key: &SigningKey) -> SigningResult<Self> {
        let signature = signing_key.sign(&signed_data.canonical_bytes()?);
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            signed_data,
            signature: B64.encode(signature.to_bytes()),
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key: encode_verifying_key(&verifying_key),
            pubkey_fingerprint: compute_key_fingerprint(&verifying_key),
        })
    }

    /// Check the embedded key, an optional pinned fingerprint and the
    /// signature itself.
    pub fn verify(&self, pinned_fingerprint: Option<&str>) -> SigningResult<()> {
        if self.signature_algorithm != SIGNATURE_ALGORITHM {
            return Err(SigningError::InvalidSignature(format!(
                "unsupported algorithm {}",
                self.signature_algorithm
            )));
        }

        let verifying_key = decode_verifying_key(&self.public_key)?;
        let actual = compute_key_fingerprint(&verifying_key);
        if actual != self.pubkey_fingerprint {
            return Err(SigningError::FingerprintMismatch {
                expected: self.pubkey_fingerprint.clone(),
                actual,
            });
        }
        if let Some(pinned) = pinned_fingerprint {
            if actual != pinned {
                return Err(SigningError::FingerprintMismatch {
                    expected: pinned.to_string(),
                    actual,
                });
            }
        }

        let sig_bytes = B64.decode(&self.signature)?;
        let signature = Ed25519Signature::from_slice(&sig_bytes)
            .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
        verifying_key
            .verify(&self.signed_data.canonical_bytes()?, &signature)
            .map_err(|e| SigningError::InvalidSignature(e.to_string()))
    }

    pub fn to_signature(&self) -> SigningResult<Signature> {
        Ok(Signature::from_bytes(serde_json::to_vec_pretty(self)?))
    }

    pub fn from_signature(signature: &Signature) -> SigningResult<Self> {
        Ok(serde_json::from_slice(signature.as_bytes())?)
    }
}

/// Signs containers with an Ed25519 key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Signer with a freshly generated key.
    pub fn generate() -> Self {
        Self::new(generate_keypair())
    }

    pub fn from_base64(encoded: &str) -> SigningResult<Self> {
        decode_signing_key(encoded).map(Self::new)
    }

    /// Signer with the base64 key stored in `path`.
    pub fn from_key_file(path: &Path) -> SigningResult<Self> {
        let encoded = fs::read_to_string(path)?;
        Self::from_base64(encoded.trim())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.verifying_key())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

impl SignatureService for Ed25519Signer {
    fn sign(&self, container: &Container) -> Result<Signature> {
        let manifest = container.manifest()?;
        let signed_data = SignedData {
            schema_id: SIGNATURE_SCHEMA_ID.to_string(),
            container_type: container.container_type(),
            manifest_root_sha256: manifest.root_sha256,
            signed_at: Utc::now(),
        };
        let document = SignatureDocument::sign(signed_data, &self.key)?;
        tracing::debug!(
            fingerprint = %document.pubkey_fingerprint,
            root = %document.signed_data.manifest_root_sha256,
            "container signed"
        );
        Ok(document.to_signature()?)
    }
}

/// Validates Ed25519 signature documents against the current content.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Validator {
    pinned_fingerprint: Option<String>,
}

impl Ed25519Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only signatures made with the key of this fingerprint.
    pub fn pinned(fingerprint: impl Into<String>) -> Self {
        Self {
            pinned_fingerprint: Some(fingerprint.into()),
        }
    }

    pub fn pinned_fingerprint(&self) -> Option<&str> {
        self.pinned_fingerprint.as_deref()
    }
}

impl ContainerValidator for Ed25519Validator {
    fn validate(&self, container: &Container) -> ValidationReport {
        let signatures = container.signatures();
        if signatures.is_empty() {
            return ValidationReport::fail(0, vec!["container has no signatures".to_string()]);
        }

        let current_root = match container.manifest() {
            Ok(manifest) => manifest.root_sha256,
            Err(e) => {
                return ValidationReport::fail(signatures.len(), vec![format!("manifest: {}", e)]);
            }
        };

        let mut errors = Vec::new();
        for (index, signature) in signatures.iter().enumerate() {
            let document = match SignatureDocument::from_signature(signature) {
                Ok(document) => document,
                Err(e) => {
                    errors.push(format!("signature {}: not a signature document: {}", index, e));
                    continue;
                }
            };
            if let Err(e) = document.verify(self.pinned_fingerprint()) {
                errors.push(format!("signature {}: {}", index, e));
                continue;
            }
            if document.signed_data.manifest_root_sha256 != current_root {
                errors.push(format!(
                    "signature {}: data files changed since signing",
                    index
                ));
            }
        }

        let report = ValidationReport::from_errors(signatures.len(), errors);
        tracing::debug!(passed = report.passed, signatures = signatures.len(), "container validated");
        report
    }
}

/// Compute SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

pub fn encode_signing_key(key: &SigningKey) -> String {
    B64.encode(key.to_bytes())
}

pub fn decode_signing_key(encoded: &str) -> SigningResult<SigningKey> {
    let bytes = B64.decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes_array))
}

pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    B64.encode(key.as_bytes())
}

pub fn decode_verifying_key(encoded: &str) -> SigningResult<VerifyingKey> {
    let bytes = B64.decode(encoded)?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes_array).map_err(|e| SigningError::InvalidKey(e.to_string()))
}
