//! Archive reader and writer
//!
//! A container is stored as a tar stream with canonical headers (mtime 0,
//! uid/gid 0, mode 0644). Entry order is fixed:
//!
//! 1. `mimetype`
//! 2. `META-INF/manifest.json`
//! 3. `META-INF/signatures<N>.json`, one per signature
//! 4. data files, in container order
//!
//! Writing never creates temporary files: [`ContainerStream`] pulls each data
//! file's content through its reader while the caller reads.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor, Read};

use tar::{Archive, EntryType, Header};

use super::manifest::Manifest;
use super::{ContainerType, MIME_TYPE};
use crate::datafile::{validate_name, DataFile, META_INF_PREFIX, MIMETYPE_ENTRY};
use crate::error::{ContainerError, Result};
use crate::signature::Signature;
use crate::storage::{ContentReader, ContentSource, StoragePolicy};

/// Archive entry holding the manifest.
pub const MANIFEST_ENTRY: &str = "META-INF/manifest.json";

const BLOCK_SIZE: u64 = 512;
const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &str = "././@LongLink";

/// Archive entry name of the signature at `index`.
pub fn signature_entry_name(index: usize) -> String {
    format!("{}signatures{}.json", META_INF_PREFIX, index)
}

fn is_signature_entry(name: &str) -> bool {
    name.strip_prefix(META_INF_PREFIX)
        .and_then(|rest| rest.strip_prefix("signatures"))
        .and_then(|rest| rest.strip_suffix(".json"))
        .map(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn malformed(reason: impl Into<String>) -> ContainerError {
    ContainerError::MalformedArchive(reason.into())
}

/// Reads one entry's body and remembers whether the archive itself failed,
/// so local spill errors are not reported as a malformed archive.
struct EntryReader<'a, R: Read> {
    inner: &'a mut R,
    remaining: u64,
    failed: bool,
}

impl<'a, R: Read> EntryReader<'a, R> {
    fn new(inner: &'a mut R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
            failed: false,
        }
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        match self.inner.read(&mut buf[..max]) {
            Ok(0) => {
                self.failed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("entry truncated, {} bytes missing", self.remaining),
                ))
            }
            Ok(n) => {
                self.remaining -= n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

fn padding_len(size: u64) -> usize {
    ((BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE) as usize
}

fn canonical_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    header
}

/// Header block(s) for a regular entry. Names longer than the 100-byte
/// header field are carried in a preceding GNU long-name entry.
fn entry_header_bytes(name: &str, size: u64) -> io::Result<Vec<u8>> {
    let name_bytes = name.as_bytes();
    let mut out = Vec::with_capacity(BLOCK_SIZE as usize);

    let mut header = canonical_header(size);
    if name_bytes.len() <= NAME_FIELD_LEN {
        header.set_path(name)?;
    } else {
        let long_len = name_bytes.len() as u64 + 1;
        let mut long = canonical_header(long_len);
        long.set_entry_type(EntryType::GNULongName);
        long.as_old_mut().name[..LONG_LINK_NAME.len()].copy_from_slice(LONG_LINK_NAME.as_bytes());
        long.set_cksum();
        out.extend_from_slice(long.as_bytes());
        out.extend_from_slice(name_bytes);
        out.push(0);
        out.resize(out.len() + padding_len(long_len), 0);

        header.as_old_mut().name.copy_from_slice(&name_bytes[..NAME_FIELD_LEN]);
    }
    header.set_cksum();
    out.extend_from_slice(header.as_bytes());
    Ok(out)
}

/// A complete small entry: header, data and padding.
fn buffered_entry(name: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = entry_header_bytes(name, data.len() as u64)?;
    out.extend_from_slice(data);
    out.resize(out.len() + padding_len(data.len() as u64), 0);
    Ok(out)
}

/// Content reader that yields exactly `remaining` bytes.
struct ExactContent {
    name: String,
    reader: ContentReader,
    remaining: u64,
}

impl Read for ExactContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = self.remaining.min(buf.len() as u64) as usize;
        let n = self.reader.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("data file {} ended {} bytes early", self.name, self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

enum Piece {
    Buffer(Cursor<Vec<u8>>),
    Content(ExactContent),
}

impl Read for Piece {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Piece::Buffer(cursor) => cursor.read(buf),
            Piece::Content(content) => content.read(buf),
        }
    }
}

/// The packaged output of a container, produced lazily as it is read.
///
/// Every data file reader is opened when the stream is created, so a spill
/// file that is already gone fails `save_as_stream` itself rather than a
/// later read.
pub struct ContainerStream {
    pieces: VecDeque<Piece>,
    total_len: u64,
}

impl ContainerStream {
    pub(crate) fn new(
        manifest: &Manifest,
        signatures: &[Signature],
        data_files: &[DataFile],
    ) -> Result<Self> {
        let mut stream = Self {
            pieces: VecDeque::new(),
            total_len: 0,
        };

        stream.push_buffer(buffered_entry(MIMETYPE_ENTRY, MIME_TYPE.as_bytes())?);
        stream.push_buffer(buffered_entry(MANIFEST_ENTRY, &manifest.to_json_bytes()?)?);
        for (index, signature) in signatures.iter().enumerate() {
            stream.push_buffer(buffered_entry(
                &signature_entry_name(index),
                signature.as_bytes(),
            )?);
        }

        for file in data_files {
            let size = file.file_size();
            let reader = file.as_stream()?;
            stream.push_buffer(entry_header_bytes(file.name(), size)?);
            stream.total_len += size;
            stream.pieces.push_back(Piece::Content(ExactContent {
                name: file.name().to_string(),
                reader,
                remaining: size,
            }));
            stream.push_buffer(vec![0; padding_len(size)]);
        }

        stream.push_buffer(vec![0; 2 * BLOCK_SIZE as usize]);

        tracing::debug!(
            data_files = data_files.len(),
            signatures = signatures.len(),
            total_len = stream.total_len,
            "container stream prepared"
        );
        Ok(stream)
    }

    fn push_buffer(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.total_len += bytes.len() as u64;
        self.pieces.push_back(Piece::Buffer(Cursor::new(bytes)));
    }

    /// Total number of bytes the stream will yield.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }
}

impl Read for ContainerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(piece) = self.pieces.front_mut() {
            let n = piece.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.pieces.pop_front();
        }
        Ok(0)
    }
}

/// Everything recovered from a stored container.
#[derive(Debug)]
pub struct ArchiveContents {
    pub container_type: ContainerType,
    pub manifest: Manifest,
    /// Data files in manifest order
    pub data_files: Vec<DataFile>,
    pub signatures: Vec<Signature>,
}

/// Read a stored container.
///
/// Each data entry's size is taken from its header, so the placement
/// decision is made before any content byte is read. Structural problems are
/// `MalformedArchive`; a refused spill is `StorageRestricted`. On error every
/// already-ingested data file is dropped and its spill file removed.
pub fn read_archive<R: Read>(reader: R, policy: &StoragePolicy) -> Result<ArchiveContents> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| malformed(format!("cannot read archive: {}", e)))?;

    let mut saw_mimetype = false;
    let mut manifest: Option<Manifest> = None;
    let mut signatures = Vec::new();
    let mut ingested: HashMap<String, DataFile> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, entry) in entries.enumerate() {
        let mut entry = entry.map_err(|e| malformed(format!("cannot read entry: {}", e)))?;
        let name = String::from_utf8(entry.path_bytes().into_owned())
            .map_err(|_| malformed("entry name is not UTF-8"))?;

        if !entry.header().entry_type().is_file() {
            return Err(malformed(format!("entry {} is not a regular file", name)));
        }
        if !seen.insert(name.clone()) {
            return Err(malformed(format!("duplicate entry {}", name)));
        }

        if index == 0 {
            if name != MIMETYPE_ENTRY {
                return Err(malformed(format!(
                    "first entry must be {}, found {}",
                    MIMETYPE_ENTRY, name
                )));
            }
            let mut mime = String::new();
            (&mut entry)
                .take(256)
                .read_to_string(&mut mime)
                .map_err(|e| malformed(format!("mimetype: {}", e)))?;
            if mime.trim() != MIME_TYPE {
                return Err(malformed(format!("unsupported mimetype {:?}", mime)));
            }
            saw_mimetype = true;
            continue;
        }

        if name == MANIFEST_ENTRY {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| malformed(format!("manifest: {}", e)))?;
            manifest = Some(Manifest::from_json_bytes(&bytes)?);
            continue;
        }

        if name.starts_with(META_INF_PREFIX) {
            if is_signature_entry(&name) {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| malformed(format!("{}: {}", name, e)))?;
                signatures.push(Signature::from_bytes(bytes));
            } else {
                tracing::debug!(entry = %name, "skipping unknown metadata entry");
            }
            continue;
        }

        let manifest = manifest
            .as_ref()
            .ok_or_else(|| malformed(format!("data entry {} precedes the manifest", name)))?;
        let expected = manifest
            .entry(&name)
            .ok_or_else(|| malformed(format!("entry {} is not listed in the manifest", name)))?;
        validate_name(&name).map_err(|_| malformed(format!("invalid entry name {}", name)))?;

        let size = entry
            .header()
            .size()
            .map_err(|e| malformed(format!("{}: {}", name, e)))?;
        if size != expected.size {
            return Err(malformed(format!(
                "{} is {} bytes, manifest says {}",
                name, size, expected.size
            )));
        }

        let mut source = EntryReader::new(&mut entry, size);
        let file = DataFile::ingest(
            ContentSource::Sized {
                reader: &mut source,
                len: size,
            },
            name.clone(),
            expected.mime_type.clone(),
            policy,
            false,
        )
        .map_err(|e| match e {
            ContainerError::Io(e) if source.failed => malformed(format!("{}: {}", name, e)),
            other => other,
        })?;

        if file.sha256() != expected.sha256 {
            return Err(malformed(format!("{} does not match its manifest digest", name)));
        }
        ingested.insert(name, file);
    }

    if !saw_mimetype {
        return Err(malformed("archive is empty"));
    }
    let manifest = manifest.ok_or_else(|| malformed("archive has no manifest"))?;

    let mut data_files = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let file = ingested
            .remove(&entry.name)
            .ok_or_else(|| malformed(format!("manifest entry {} is missing", entry.name)))?;
        data_files.push(file);
    }

    tracing::debug!(
        data_files = data_files.len(),
        signatures = signatures.len(),
        "archive read"
    );

    Ok(ArchiveContents {
        container_type: manifest.container_type,
        manifest,
        data_files,
        signatures,
    })
}
