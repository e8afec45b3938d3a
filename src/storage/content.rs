//! Data file content: the memory/disk decision engine.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::spill::SpillFile;
use super::{Placement, StoragePolicy};
use crate::error::{ContainerError, Result};

/// Where content comes from.
pub enum ContentSource<'a> {
    /// Caller-owned bytes; copied, never aliased.
    Bytes(&'a [u8]),

    /// A file on disk; its size is read from metadata.
    Path(&'a Path),

    /// A stream of unknown length.
    Stream(&'a mut dyn Read),

    /// A stream whose length is known up front (archive entries).
    Sized { reader: &'a mut dyn Read, len: u64 },
}

impl fmt::Debug for ContentSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ContentSource::Path(p) => write!(f, "Path({})", p.display()),
            ContentSource::Stream(_) => write!(f, "Stream"),
            ContentSource::Sized { len, .. } => write!(f, "Sized({} bytes)", len),
        }
    }
}

enum Storage {
    InMemory(Arc<[u8]>),
    OnDisk(SpillFile),
}

/// Content of a data file, held in memory or in a spill file.
///
/// The variant is chosen once at ingestion and never changes.
pub struct DataFileContent {
    storage: Storage,
    len: u64,
    sha256: String,
}

impl DataFileContent {
    /// Ingest `source` under `policy`.
    ///
    /// `force_disk` marks a large data file: it always spills, whatever its
    /// size. A spill refused by the write gate fails here with
    /// `StorageRestricted`.
    pub fn ingest(source: ContentSource<'_>, policy: &StoragePolicy, force_disk: bool) -> Result<Self> {
        let content = match source {
            ContentSource::Bytes(bytes) => match policy.placement_for(bytes.len() as u64, force_disk) {
                Placement::Memory => Self::in_memory(bytes.to_vec()),
                Placement::Disk => {
                    let mut reader = bytes;
                    Self::spill(&[], &mut reader, policy)?
                }
            },
            ContentSource::Path(path) => {
                let len = fs::metadata(path)?.len();
                match policy.placement_for(len, force_disk) {
                    Placement::Memory => Self::in_memory(fs::read(path)?),
                    Placement::Disk => {
                        let mut file = BufReader::new(File::open(path)?);
                        Self::spill(&[], &mut file, policy)?
                    }
                }
            }
            ContentSource::Sized { reader, len } => match policy.placement_for(len, force_disk) {
                Placement::Memory => {
                    let mut buf = Vec::with_capacity(len as usize);
                    reader.take(len).read_to_end(&mut buf)?;
                    if buf.len() as u64 != len {
                        return Err(short_read(len, buf.len() as u64));
                    }
                    Self::in_memory(buf)
                }
                Placement::Disk => {
                    let mut limited = reader.take(len);
                    let content = Self::spill(&[], &mut limited, policy)?;
                    if content.len != len {
                        // Dropping `content` removes the partial spill file.
                        return Err(short_read(len, content.len));
                    }
                    content
                }
            },
            ContentSource::Stream(reader) => Self::ingest_stream(reader, policy, force_disk)?,
        };

        tracing::debug!(
            len = content.len,
            placement = %content.placement(),
            threshold = policy.threshold().max_in_memory_bytes(),
            "content ingested"
        );
        Ok(content)
    }

    /// Buffer up to threshold + 1 bytes; if the stream ends first the buffer
    /// is the content, otherwise the buffer is flushed to a spill file and the
    /// rest of the stream follows it.
    fn ingest_stream(reader: &mut dyn Read, policy: &StoragePolicy, force_disk: bool) -> Result<Self> {
        let threshold = policy.threshold();
        if force_disk || threshold.spills_everything() {
            return Self::spill(&[], reader, policy);
        }

        let limit = threshold.max_in_memory_bytes();
        let mut buffer = Vec::new();
        (&mut *reader).take(limit.saturating_add(1)).read_to_end(&mut buffer)?;

        if buffer.len() as u64 > limit {
            Self::spill(&buffer, reader, policy)
        } else {
            Ok(Self::in_memory(buffer))
        }
    }

    fn in_memory(bytes: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            len: bytes.len() as u64,
            storage: Storage::InMemory(Arc::from(bytes)),
            sha256,
        }
    }

    fn spill(prefix: &[u8], reader: &mut dyn Read, policy: &StoragePolicy) -> Result<Self> {
        let spilled = SpillFile::create(prefix, reader, policy)?;
        Ok(Self {
            storage: Storage::OnDisk(spilled.file),
            len: spilled.len,
            sha256: spilled.sha256,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex SHA-256 of the content, computed at ingestion.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn placement(&self) -> Placement {
        match self.storage {
            Storage::InMemory(_) => Placement::Memory,
            Storage::OnDisk(_) => Placement::Disk,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.placement() == Placement::Memory
    }

    /// Path of the backing spill file, if on disk.
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::OnDisk(spill) => Some(spill.path()),
            Storage::InMemory(_) => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        match &self.storage {
            Storage::OnDisk(spill) => spill.is_released(),
            Storage::InMemory(_) => false,
        }
    }

    /// Open a fresh reader over the full content.
    pub fn as_stream(&self) -> Result<ContentReader> {
        match &self.storage {
            Storage::InMemory(bytes) => Ok(ContentReader::Memory(Cursor::new(Arc::clone(bytes)))),
            Storage::OnDisk(spill) => spill.open().map(ContentReader::Disk),
        }
    }

    /// Full in-memory copy of the content.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        match &self.storage {
            Storage::InMemory(bytes) => Ok(bytes.to_vec()),
            Storage::OnDisk(_) => {
                let mut buf = Vec::with_capacity(self.len as usize);
                self.as_stream()?.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Release the spill file, if any. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Storage::OnDisk(spill) = &mut self.storage {
            spill.release();
        }
    }
}

fn short_read(expected: u64, got: u64) -> ContainerError {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("expected {} bytes, got {}", expected, got),
    )
    .into()
}

impl fmt::Debug for DataFileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFileContent")
            .field("placement", &self.placement())
            .field("len", &self.len)
            .field("sha256", &self.sha256)
            .field("spill_path", &self.spill_path())
            .finish()
    }
}

/// Reader returned by [`DataFileContent::as_stream`].
pub enum ContentReader {
    Memory(Cursor<Arc<[u8]>>),
    Disk(BufReader<File>),
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ContentReader::Memory(cursor) => cursor.read(buf),
            ContentReader::Disk(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContainerError;
    use crate::storage::StorageThreshold;
    use asic_write_policy::WriteGate;
    use tempfile::TempDir;

    fn policy(dir: &Path, threshold: u64, gate: WriteGate) -> StoragePolicy {
        StoragePolicy::new(StorageThreshold::from_bytes(threshold), dir, Arc::new(gate))
    }

    fn read_all(content: &DataFileContent) -> Vec<u8> {
        let mut buf = Vec::new();
        content.as_stream().unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_bytes_under_threshold_stay_in_memory() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 3, WriteGate::deny_all());

        let content = DataFileContent::ingest(ContentSource::Bytes(&[1, 2, 3]), &p, false).unwrap();
        assert!(content.is_in_memory());
        assert_eq!(read_all(&content), vec![1, 2, 3]);
        assert_eq!(p.gate().attempt_count(), 0);
    }

    #[test]
    fn test_bytes_copy_is_independent() {
        let mut bytes = vec![1u8, 2, 3];
        let content =
            DataFileContent::ingest(ContentSource::Bytes(&bytes), &StoragePolicy::default(), false)
                .unwrap();
        bytes[0] = 9;
        assert_eq!(content.to_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bytes_over_threshold_spill() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 2, WriteGate::allow_all());

        let content = DataFileContent::ingest(ContentSource::Bytes(&[1, 2, 3]), &p, false).unwrap();
        assert_eq!(content.placement(), Placement::Disk);
        assert!(content.spill_path().unwrap().starts_with(dir.path()));
        assert_eq!(read_all(&content), vec![1, 2, 3]);
        assert_eq!(read_all(&content), vec![1, 2, 3]);
    }

    #[test]
    fn test_spill_refused_is_storage_restricted() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 2, WriteGate::deny_all());

        let err = DataFileContent::ingest(ContentSource::Bytes(&[1, 2, 3]), &p, false).unwrap_err();
        assert!(matches!(err, ContainerError::StorageRestricted { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_force_disk_ignores_size() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 1024, WriteGate::allow_all());

        let mut stream: &[u8] = &[1, 2, 3];
        let content = DataFileContent::ingest(ContentSource::Stream(&mut stream), &p, true).unwrap();
        assert_eq!(content.placement(), Placement::Disk);
    }

    #[test]
    fn test_stream_at_threshold_stays_in_memory() {
        let p = StoragePolicy::default().with_threshold(StorageThreshold::from_bytes(3));
        let mut stream: &[u8] = &[1, 2, 3];

        let content = DataFileContent::ingest(ContentSource::Stream(&mut stream), &p, false).unwrap();
        assert!(content.is_in_memory());
        assert_eq!(content.len(), 3);
    }

    #[test]
    fn test_stream_crossing_threshold_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 4, WriteGate::allow_all());
        let data: Vec<u8> = (0..100u8).collect();
        let mut stream: &[u8] = &data;

        let content = DataFileContent::ingest(ContentSource::Stream(&mut stream), &p, false).unwrap();
        assert_eq!(content.placement(), Placement::Disk);
        assert_eq!(content.len(), 100);
        assert_eq!(read_all(&content), data);
        assert_eq!(content.sha256(), hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn test_sized_reader_reads_exactly_len() {
        let p = StoragePolicy::default();
        let mut reader: &[u8] = b"abcdef";

        let content =
            DataFileContent::ingest(ContentSource::Sized { reader: &mut reader, len: 4 }, &p, false)
                .unwrap();
        assert_eq!(content.to_vec().unwrap(), b"abcd");
        assert_eq!(reader, b"ef");
    }

    #[test]
    fn test_sized_reader_short_read_fails() {
        let p = StoragePolicy::default();
        let mut reader: &[u8] = b"ab";

        let err =
            DataFileContent::ingest(ContentSource::Sized { reader: &mut reader, len: 4 }, &p, false)
                .unwrap_err();
        assert!(matches!(err, ContainerError::Io(_)));
    }

    #[test]
    fn test_sized_reader_short_read_fails_on_disk() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 0, WriteGate::allow_all());
        let mut reader: &[u8] = b"ab";

        let err =
            DataFileContent::ingest(ContentSource::Sized { reader: &mut reader, len: 4 }, &p, false)
                .unwrap_err();
        match err {
            ContainerError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_path_source_uses_file_size() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("input.bin");
        fs::write(&file, vec![7u8; 10]).unwrap();

        let spill_dir = dir.path().join("spill");
        let small = policy(&spill_dir, 10, WriteGate::deny_all());
        let content = DataFileContent::ingest(ContentSource::Path(&file), &small, false).unwrap();
        assert!(content.is_in_memory());

        let large = policy(&spill_dir, 9, WriteGate::allow_all());
        let content = DataFileContent::ingest(ContentSource::Path(&file), &large, false).unwrap();
        assert_eq!(content.placement(), Placement::Disk);
        assert_eq!(content.to_vec().unwrap(), vec![7u8; 10]);
    }

    #[test]
    fn test_dispose_releases_and_blocks_reads() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 0, WriteGate::allow_all());

        let mut content = DataFileContent::ingest(ContentSource::Bytes(b"x"), &p, false).unwrap();
        let path = content.spill_path().unwrap().to_path_buf();
        assert!(path.exists());

        content.dispose();
        content.dispose();
        assert!(!path.exists());
        assert!(content.is_disposed());
        assert!(matches!(
            content.as_stream(),
            Err(ContainerError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_externally_deleted_spill_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let p = policy(dir.path(), 0, WriteGate::allow_all());

        let content = DataFileContent::ingest(ContentSource::Bytes(b"x"), &p, false).unwrap();
        fs::remove_file(content.spill_path().unwrap()).unwrap();
        assert!(matches!(
            content.as_stream(),
            Err(ContainerError::ContentUnavailable { .. })
        ));
    }
}
