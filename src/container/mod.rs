//! Signable document containers
//!
//! A [`Container`] owns an ordered list of [`DataFile`]s and opaque
//! [`Signature`]s, and packages them into a single archive stream on demand.
//! Data files are added while the container is `Open`; the first save or
//! validation closes it so later signatures keep covering the same content.

mod archive;
mod builder;
mod manifest;

pub use archive::{read_archive, signature_entry_name, ArchiveContents, ContainerStream, MANIFEST_ENTRY};
pub use builder::ContainerBuilder;
pub use manifest::{Manifest, ManifestEntry};

use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::datafile::DataFile;
use crate::error::{ContainerError, Result};
use crate::signature::{ContainerValidator, Signature, SignatureService, ValidationReport};
use crate::storage::{ContentSource, StoragePolicy};

/// Content of the `mimetype` entry.
pub const MIME_TYPE: &str = "application/vnd.etsi.asic-e+zip";

/// Container flavour, recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Bdoc,
    Asice,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Bdoc => "bdoc",
            ContainerType::Asice => "asice",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bdoc" => Ok(ContainerType::Bdoc),
            "asice" | "asic-e" => Ok(ContainerType::Asice),
            other => Err(format!("unknown container type: {}", other)),
        }
    }
}

/// Whether data files may still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Data files may be added and removed
    Open,
    /// Data files are fixed; signatures may still be added
    Closed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Open => write!(f, "open"),
            ContainerState::Closed => write!(f, "closed"),
        }
    }
}

/// A signable container of data files.
#[derive(Debug)]
pub struct Container {
    container_type: ContainerType,
    data_files: Vec<DataFile>,
    signatures: Vec<Signature>,
    configuration: Configuration,
    storage: StoragePolicy,
    state: ContainerState,
}

impl Container {
    /// An empty, open container.
    pub fn new(container_type: ContainerType, configuration: Configuration, storage: StoragePolicy) -> Self {
        Self {
            container_type,
            data_files: Vec::new(),
            signatures: Vec::new(),
            configuration,
            storage,
            state: ContainerState::Open,
        }
    }

    /// A container recovered from an archive. Stored signatures close it.
    pub(crate) fn from_archive(
        contents: ArchiveContents,
        configuration: Configuration,
        storage: StoragePolicy,
    ) -> Self {
        let state = if contents.signatures.is_empty() {
            ContainerState::Open
        } else {
            ContainerState::Closed
        };
        Self {
            container_type: contents.container_type,
            data_files: contents.data_files,
            signatures: contents.signatures,
            configuration,
            storage,
            state,
        }
    }

    pub fn container_type(&self) -> ContainerType {
        self.container_type
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Storage policy applied to content added through this container.
    pub fn storage_policy(&self) -> &StoragePolicy {
        &self.storage
    }

    pub fn data_files(&self) -> &[DataFile] {
        &self.data_files
    }

    pub fn data_file(&self, name: &str) -> Option<&DataFile> {
        self.data_files.iter().find(|f| f.name() == name)
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ContainerState::Open => Ok(()),
            ContainerState::Closed => Err(ContainerError::ContainerClosed),
        }
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.data_file(name).is_some() {
            return Err(ContainerError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Append an already-constructed data file.
    pub fn add_data_file(&mut self, file: DataFile) -> Result<()> {
        self.ensure_open()?;
        self.ensure_unique(file.name())?;
        tracing::debug!(name = file.name(), placement = %file.placement(), "data file added");
        self.data_files.push(file);
        Ok(())
    }

    /// Ingest `source` under this container's storage policy and append it.
    ///
    /// State and name are checked before any content is read.
    pub fn add_data_file_from(
        &mut self,
        source: ContentSource<'_>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        self.ensure_open()?;
        self.ensure_unique(&name)?;
        let file = DataFile::ingest(source, name, mime_type.into(), &self.storage, false)?;
        self.add_data_file(file)
    }

    /// Remove a data file and release its content.
    pub fn remove_data_file(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let index = self
            .data_files
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        let mut file = self.data_files.remove(index);
        file.dispose();
        Ok(())
    }

    pub fn add_signature(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }

    /// Ask `service` for a signature over the current content and append it.
    pub fn sign_with(&mut self, service: &dyn SignatureService) -> Result<&Signature> {
        let signature = service.sign(self)?;
        self.state = ContainerState::Closed;
        self.signatures.push(signature);
        let index = self.signatures.len() - 1;
        Ok(&self.signatures[index])
    }

    /// Manifest describing the current data files.
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::from_data_files(self.container_type, &self.data_files)
    }

    pub fn validate(&mut self, validator: &dyn ContainerValidator) -> ValidationReport {
        self.state = ContainerState::Closed;
        validator.validate(self)
    }

    /// Package the container into a readable archive stream.
    ///
    /// No temporary file is created; on-disk content is read from its spill
    /// file as the stream is consumed.
    pub fn save_as_stream(&mut self) -> Result<ContainerStream> {
        let manifest = self.manifest()?;
        let stream = ContainerStream::new(&manifest, &self.signatures, &self.data_files)?;
        self.state = ContainerState::Closed;
        Ok(stream)
    }

    /// Write the archive to `writer`, returning the bytes written.
    pub fn save<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let mut stream = self.save_as_stream()?;
        let written = io::copy(&mut stream, writer)?;
        Ok(written)
    }

    /// Write the archive to `path`. The file is created through the
    /// container's write gate.
    pub fn save_to_path(&mut self, path: &Path) -> Result<u64> {
        let file = self.storage.gate().create(path)?;
        let mut writer = BufWriter::new(file);
        let written = self.save(&mut writer)?;
        writer.flush()?;
        tracing::debug!(path = %path.display(), bytes = written, "container saved");
        Ok(written)
    }

    /// Release every spill file. Data files stay listed but on-disk content
    /// can no longer be read.
    pub fn dispose(&mut self) {
        for file in &mut self.data_files {
            file.dispose();
        }
    }
}
