//! ASiC container - signable document containers with policy-driven storage
//!
//! Data files attached to a container are held in memory or spilled to a
//! temporary file according to a configured size threshold. Every disk write
//! passes through an explicit [`WriteGate`], so a restricted deployment can
//! prove no uncontrolled I/O happened. Containers are packaged into a single
//! archive stream that mixes in-memory and on-disk content.

pub mod config;
pub mod container;
pub mod datafile;
pub mod error;
pub mod signature;
pub mod signing;
pub mod storage;

pub use asic_write_policy::{WriteAttempt, WriteDecision, WriteError, WriteGate, WritePolicy};
pub use config::{Configuration, EffectiveConfig};
pub use container::{Container, ContainerBuilder, ContainerState, ContainerStream, ContainerType, Manifest};
pub use datafile::DataFile;
pub use error::{ContainerError, Result};
pub use signature::{ContainerValidator, Signature, SignatureService, ValidationReport};
pub use signing::{Ed25519Signer, Ed25519Validator};
pub use storage::{ContentSource, DataFileContent, Placement, StoragePolicy, StorageThreshold};
