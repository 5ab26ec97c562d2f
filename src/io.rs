//! Byte-level file access for region files.

use crate::error::{RegionError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Buffer size for tail-shifting and zero-fill loops.
const SHIFT_CHUNK_SIZE: usize = 4096;

/// Disk-backed region storage.
///
/// Thin wrapper over a read-write file handle: byte-addressable reads,
/// writes, seeks, length queries and the byte-insertion shift used by
/// header migration. One instance owns the handle exclusively.
pub struct RegionIo {
    file: File,
    path: PathBuf,
}

impl RegionIo {
    /// Create a new region file, making parent directories as needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|_| RegionError::CantCreate(path.as_ref().to_path_buf()))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(RegionIo {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing region file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(RegionIo {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    /// Reads exactly `buf.len()` bytes, reporting a clean truncation error
    /// when the file ends early.
    pub fn read_exact_or_truncated(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RegionError::TruncatedFile
            } else {
                RegionError::Io(e)
            }
        })
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_or_truncated(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn write_zeros(&mut self, count: u64) -> Result<()> {
        let zeros = [0u8; SHIFT_CHUNK_SIZE];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(SHIFT_CHUNK_SIZE as u64) as usize;
            self.file.write_all(&zeros[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Inserts `count` zero bytes at the current position, shifting all
    /// following bytes forward. The copy walks the tail backward in chunks
    /// so source and destination ranges never overlap within one step.
    pub fn insert_bytes(&mut self, count: u64) -> Result<()> {
        let pos = self.file.stream_position()?;
        let old_len = self.len()?;
        debug_assert!(pos <= old_len);

        let mut buf = vec![0u8; SHIFT_CHUNK_SIZE];
        let mut remaining = old_len - pos;
        while remaining > 0 {
            let chunk = remaining.min(SHIFT_CHUNK_SIZE as u64) as usize;
            let src = pos + remaining - chunk as u64;
            self.file.seek(SeekFrom::Start(src))?;
            self.read_exact_or_truncated(&mut buf[..chunk])?;
            self.file.seek(SeekFrom::Start(src + count))?;
            self.file.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }

        self.file.seek(SeekFrom::Start(pos))?;
        self.write_zeros(count)?;
        Ok(())
    }
}

impl Read for RegionIo {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for RegionIo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for RegionIo {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_io(dir: &tempfile::TempDir, name: &str) -> RegionIo {
        RegionIo::create(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_create_makes_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.vxr");
        let io = RegionIo::create(&path).unwrap();
        assert_eq!(io.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn test_u32_round_trip() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "u32.bin");
        io.write_u32_le(0xdead_beef).unwrap();
        io.seek_to(0).unwrap();
        assert_eq!(io.read_u32_le().unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_read_past_end_is_truncation() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "short.bin");
        io.write_all(b"ab").unwrap();
        io.seek_to(0).unwrap();
        assert!(matches!(
            io.read_u32_le(),
            Err(RegionError::TruncatedFile)
        ));
    }

    #[test]
    fn test_insert_bytes_shifts_tail() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "insert.bin");
        io.write_all(b"HelloWorld").unwrap();

        io.seek_to(5).unwrap();
        io.insert_bytes(3).unwrap();

        assert_eq!(io.len().unwrap(), 13);
        let mut contents = vec![0u8; 13];
        io.seek_to(0).unwrap();
        io.read_exact_or_truncated(&mut contents).unwrap();
        assert_eq!(&contents, b"Hello\0\0\0World");
    }

    #[test]
    fn test_insert_bytes_larger_than_chunk() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "insert_big.bin");
        let tail: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        io.write_all(b"head").unwrap();
        io.write_all(&tail).unwrap();

        io.seek_to(4).unwrap();
        io.insert_bytes(1000).unwrap();

        let mut contents = vec![0u8; 4 + 1000 + tail.len()];
        io.seek_to(0).unwrap();
        io.read_exact_or_truncated(&mut contents).unwrap();
        assert_eq!(&contents[..4], b"head");
        assert!(contents[4..1004].iter().all(|&b| b == 0));
        assert_eq!(&contents[1004..], tail.as_slice());
    }

    #[test]
    fn test_insert_bytes_at_end_appends_zeros() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "insert_end.bin");
        io.write_all(b"abc").unwrap();
        io.insert_bytes(5).unwrap();
        assert_eq!(io.len().unwrap(), 8);
    }

    #[test]
    fn test_set_len_truncates() {
        let dir = tempdir().unwrap();
        let mut io = new_io(&dir, "trunc.bin");
        io.write_all(&[1u8; 100]).unwrap();
        io.set_len(40).unwrap();
        assert_eq!(io.len().unwrap(), 40);
    }
}
