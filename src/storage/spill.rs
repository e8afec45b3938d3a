//! Spill files backing on-disk content.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::StoragePolicy;
use crate::error::{ContainerError, Result};

/// Exclusively owned temporary file. Deleted on [`SpillFile::release`] or drop.
#[derive(Debug)]
pub(crate) struct SpillFile {
    path: PathBuf,
    released: bool,
}

/// A spill file plus the length and digest of what was written to it.
pub(crate) struct Spilled {
    pub file: SpillFile,
    pub len: u64,
    pub sha256: String,
}

impl SpillFile {
    /// Write `prefix` followed by the rest of `reader` to a new spill file.
    ///
    /// The file is created through the policy's write gate; a refusal surfaces
    /// as `StorageRestricted` before anything touches the disk.
    pub fn create(prefix: &[u8], reader: &mut dyn Read, policy: &StoragePolicy) -> Result<Spilled> {
        let gate = policy.gate();
        gate.create_dir_all(policy.spill_dir())?;

        let path = policy
            .spill_dir()
            .join(format!("asic-{}.spill", uuid::Uuid::new_v4()));
        let file = gate.create_new(&path)?;
        // Owned from here on: an error below drops `spill` and removes the file.
        let spill = SpillFile {
            path,
            released: false,
        };

        let mut writer = HashingWriter::new(BufWriter::new(file));
        writer.write_all(prefix)?;
        io::copy(reader, &mut writer)?;
        let (len, sha256) = writer.finish()?;

        tracing::debug!(path = %spill.path.display(), len, "content spilled to disk");
        Ok(Spilled {
            file: spill,
            len,
            sha256,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn open(&self) -> Result<BufReader<File>> {
        if self.released {
            return Err(ContainerError::ContentUnavailable {
                path: self.path.clone(),
                reason: "spill file was disposed".to_string(),
            });
        }
        File::open(&self.path)
            .map(BufReader::new)
            .map_err(|e| ContainerError::ContentUnavailable {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Delete the file. Idempotent; failures are logged, never raised.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "spill file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "spill file already gone")
            }
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove spill file"
            ),
        }
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Writer that counts and hashes everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(mut self) -> io::Result<(u64, String)> {
        self.inner.flush()?;
        Ok((self.written, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
