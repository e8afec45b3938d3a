//! Fluent construction of containers.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asic_write_policy::WriteGate;

use super::{read_archive, Container, ContainerType};
use crate::config::Configuration;
use crate::datafile::DataFile;
use crate::error::{ContainerError, Result};
use crate::storage::{ContentSource, StoragePolicy};

enum Origin {
    Empty,
    ExistingFile(PathBuf),
    Stream(Box<dyn Read + Send>),
}

/// Single-use container builder.
///
/// Data files added through the builder are ingested immediately, under the
/// configuration and gate in effect at that step. An existing archive is read
/// in [`ContainerBuilder::build`], under the final configuration. The first
/// failing step is remembered and returned by `build`; later steps are
/// skipped.
pub struct ContainerBuilder {
    container_type: ContainerType,
    origin: Origin,
    configuration: Configuration,
    gate: Arc<WriteGate>,
    explicit_gate: bool,
    data_files: Vec<DataFile>,
    error: Option<ContainerError>,
}

impl ContainerBuilder {
    /// Start an empty container of `container_type` with default
    /// configuration.
    pub fn a_container(container_type: ContainerType) -> Self {
        let configuration = Configuration::default();
        let gate = configuration.write_gate();
        Self {
            container_type,
            origin: Origin::Empty,
            configuration,
            gate,
            explicit_gate: false,
            data_files: Vec::new(),
            error: None,
        }
    }

    /// Open the archive at `path` when the container is built.
    pub fn from_existing_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.origin = Origin::ExistingFile(path.into());
        self
    }

    /// Open an archive read from `reader` when the container is built.
    pub fn from_stream<R: Read + Send + 'static>(mut self, reader: R) -> Self {
        self.origin = Origin::Stream(Box::new(reader));
        self
    }

    /// Use `configuration` for every later step. Replaces the write gate
    /// unless one was set with [`ContainerBuilder::with_write_gate`].
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        if !self.explicit_gate {
            self.gate = configuration.write_gate();
        }
        self.configuration = configuration;
        self
    }

    pub fn with_write_gate(mut self, gate: Arc<WriteGate>) -> Self {
        self.gate = gate;
        self.explicit_gate = true;
        self
    }

    fn storage_policy(&self) -> StoragePolicy {
        self.configuration.storage_policy_with_gate(Arc::clone(&self.gate))
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.data_files.iter().any(|f| f.name() == name) {
            return Err(ContainerError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Run one data file step. A `name` known up front is checked for
    /// duplicates before `make` reads any content.
    fn ingest_with<F>(mut self, name: Option<&str>, make: F) -> Self
    where
        F: FnOnce(&StoragePolicy) -> Result<DataFile>,
    {
        if self.error.is_some() {
            return self;
        }
        let result = match name {
            Some(name) => self.ensure_unique(name),
            None => Ok(()),
        }
        .and_then(|()| make(&self.storage_policy()))
        .and_then(|file| self.ensure_unique(file.name()).map(|()| file));
        match result {
            Ok(file) => self.data_files.push(file),
            Err(e) => {
                tracing::debug!(error = %e, "builder step failed");
                self.error = Some(e);
            }
        }
        self
    }

    /// Add an already-constructed data file.
    pub fn with_data_file(self, file: DataFile) -> Self {
        self.ingest_with(None, |_| Ok(file))
    }

    /// Add the file at `path`, named after its last path component.
    pub fn with_data_file_from_path(self, path: impl AsRef<Path>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str());
        self.ingest_with(name, |policy| DataFile::from_path(path, mime_type, policy))
    }

    pub fn with_data_file_from_bytes(
        self,
        bytes: &[u8],
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let (name, mime_type): (String, String) = (name.into(), mime_type.into());
        let key = name.clone();
        self.ingest_with(Some(&key), |policy| {
            DataFile::from_bytes(bytes, name, mime_type, policy)
        })
    }

    pub fn with_data_file_from_reader<R: Read>(
        self,
        mut reader: R,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let (name, mime_type): (String, String) = (name.into(), mime_type.into());
        let key = name.clone();
        self.ingest_with(Some(&key), |policy| {
            DataFile::ingest(ContentSource::Stream(&mut reader), name, mime_type, policy, false)
        })
    }

    /// Add a large data file: always stored on disk.
    pub fn with_large_data_file<R: Read>(
        self,
        mut reader: R,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let (name, mime_type): (String, String) = (name.into(), mime_type.into());
        let key = name.clone();
        self.ingest_with(Some(&key), |policy| {
            DataFile::ingest(ContentSource::Stream(&mut reader), name, mime_type, policy, true)
        })
    }

    /// Finish the container.
    ///
    /// On error nothing is returned and every spill file created so far is
    /// removed.
    pub fn build(self) -> Result<Container> {
        let storage = self.storage_policy();
        let Self {
            container_type,
            origin,
            configuration,
            data_files,
            error,
            ..
        } = self;
        if let Some(err) = error {
            return Err(err);
        }

        let mut container = match origin {
            Origin::Empty => Container::new(container_type, configuration, storage),
            Origin::ExistingFile(path) => {
                let file = File::open(&path)?;
                tracing::debug!(path = %path.display(), "opening container");
                let contents = read_archive(BufReader::new(file), &storage)?;
                Container::from_archive(contents, configuration, storage)
            }
            Origin::Stream(reader) => {
                let contents = read_archive(reader, &storage)?;
                Container::from_archive(contents, configuration, storage)
            }
        };

        for file in data_files {
            container.add_data_file(file)?;
        }
        Ok(container)
    }
}
