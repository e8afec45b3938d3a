//! Signing and validation collaborator boundary.
//!
//! The container never inspects signatures. A [`SignatureService`] turns a
//! container into an opaque [`Signature`]; a [`ContainerValidator`] turns a
//! container into a [`ValidationReport`].

use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::error::Result;

/// Opaque signature bytes, stored and archived unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Produces a signature over a container.
pub trait SignatureService {
    fn sign(&self, container: &Container) -> Result<Signature>;
}

/// Judges the signatures of a container.
pub trait ContainerValidator {
    fn validate(&self, container: &Container) -> ValidationReport;
}

/// Outcome of validating a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether validation passed
    pub passed: bool,

    /// Number of signatures examined
    pub signature_count: usize,

    /// Errors found (empty if passed)
    pub errors: Vec<String>,

    /// Human-readable summary
    pub summary: String,
}

impl ValidationReport {
    pub fn pass(signature_count: usize) -> Self {
        Self {
            passed: true,
            signature_count,
            errors: Vec::new(),
            summary: format!("{} signature(s) valid", signature_count),
        }
    }

    /// A failing report; an empty error list still fails.
    pub fn fail(signature_count: usize, errors: Vec<String>) -> Self {
        let summary = match errors.len() {
            0 => "Validation failed".to_string(),
            1 => format!("Validation failed: {}", errors[0]),
            n => format!("Validation failed: {} errors (first: {})", n, errors[0]),
        };
        Self {
            passed: false,
            signature_count,
            errors,
            summary,
        }
    }

    /// Pass when `errors` is empty, fail otherwise.
    pub fn from_errors(signature_count: usize, errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::pass(signature_count)
        } else {
            Self::fail(signature_count, errors)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.passed
    }
}
