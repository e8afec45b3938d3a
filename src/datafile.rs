//! Named, mime-typed data files.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::error::{ContainerError, Result};
use crate::storage::{ContentReader, ContentSource, DataFileContent, Placement, StoragePolicy};

/// Archive entry holding the container mime type.
pub const MIMETYPE_ENTRY: &str = "mimetype";

/// Prefix reserved for container metadata entries.
pub const META_INF_PREFIX: &str = "META-INF/";

/// A data file attached to a container.
///
/// Not `Clone`: two data files with equal name, mime type and bytes are still
/// distinct, each owning its own content.
#[derive(Debug)]
pub struct DataFile {
    name: String,
    mime_type: String,
    content: DataFileContent,
}

impl DataFile {
    /// Wrap already-ingested content.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: DataFileContent) -> Result<Self> {
        let name = name.into();
        let mime_type = mime_type.into();
        validate_name(&name)?;
        validate_mime_type(&mime_type)?;
        Ok(Self {
            name,
            mime_type,
            content,
        })
    }

    pub fn from_bytes(
        bytes: &[u8],
        name: impl Into<String>,
        mime_type: impl Into<String>,
        policy: &StoragePolicy,
    ) -> Result<Self> {
        Self::ingest(ContentSource::Bytes(bytes), name.into(), mime_type.into(), policy, false)
    }

    /// Data file named after the last component of `path`.
    pub fn from_path(path: &Path, mime_type: impl Into<String>, policy: &StoragePolicy) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ContainerError::InvalidName(path.display().to_string()))?
            .to_string();
        Self::ingest(ContentSource::Path(path), name, mime_type.into(), policy, false)
    }

    pub fn from_reader(
        reader: &mut dyn Read,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        policy: &StoragePolicy,
    ) -> Result<Self> {
        Self::ingest(ContentSource::Stream(reader), name.into(), mime_type.into(), policy, false)
    }

    /// Data file declared large: always spilled to disk.
    pub fn large_from_reader(
        reader: &mut dyn Read,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        policy: &StoragePolicy,
    ) -> Result<Self> {
        Self::ingest(ContentSource::Stream(reader), name.into(), mime_type.into(), policy, true)
    }

    /// Validate identity, then ingest. Names are checked first so a bad name
    /// never costs a spill.
    pub(crate) fn ingest(
        source: ContentSource<'_>,
        name: String,
        mime_type: String,
        policy: &StoragePolicy,
        force_disk: bool,
    ) -> Result<Self> {
        validate_name(&name)?;
        validate_mime_type(&mime_type)?;
        let content = DataFileContent::ingest(source, policy, force_disk)?;
        Ok(Self {
            name,
            mime_type,
            content,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Full copy of the content in memory.
    ///
    /// For spilled content this reads the whole spill file; prefer
    /// [`DataFile::as_stream`] for large files.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.content.to_vec()
    }

    pub fn file_size(&self) -> u64 {
        self.content.len()
    }

    pub fn as_stream(&self) -> Result<ContentReader> {
        self.content.as_stream()
    }

    pub fn sha256(&self) -> &str {
        self.content.sha256()
    }

    pub fn placement(&self) -> Placement {
        self.content.placement()
    }

    pub fn content(&self) -> &DataFileContent {
        &self.content
    }

    pub fn dispose(&mut self) {
        self.content.dispose();
    }
}

/// Check a data file name is usable as an archive entry.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == MIMETYPE_ENTRY
        || name.starts_with(META_INF_PREFIX)
        || name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(ContainerError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Check a mime type has the `type/subtype` shape.
pub fn validate_mime_type(mime_type: &str) -> Result<()> {
    static MIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = MIME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*$")
            .expect("mime type pattern is valid")
    });
    if !re.is_match(mime_type) {
        return Err(ContainerError::InvalidMimeType(mime_type.to_string()));
    }
    Ok(())
}
