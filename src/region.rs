//! Region file: a 3D grid of compressed voxel blocks packed into fixed-size
//! sectors within a single file.
//!
//! Saving a block appends it to the end of the data section or rewrites it
//! in place. When a block shrinks, all following sectors are shifted forward
//! so live ranges stay contiguous; when it grows, it is freed and rewritten
//! at the end. The per-block LUT in the header is flushed on close.

use crate::buffer::VoxelBlock;
use crate::codec::BlockCodec;
use crate::error::{RegionError, Result};
use crate::format::RegionFormat;
use crate::header::{
    BlockInfo, RegionHeader, FORMAT_VERSION, FORMAT_VERSION_LEGACY_2, MAGIC_AND_VERSION_SIZE,
};
use crate::io::RegionIo;
use crate::sectors::SectorTable;
use crate::vector::Vector3i;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn not_open() -> RegionError {
    RegionError::InvalidArgument("region file is not open".to_string())
}

/// Single-writer handle to one region file.
///
/// There is no read-only mode. The public API is not reentrant; external
/// code must serialize access.
pub struct RegionFile {
    header: RegionHeader,
    file: Option<RegionIo>,
    path: PathBuf,
    /// Owner of each occupied sector, in file order.
    sectors: SectorTable,
    /// File offset at which sector 0 starts.
    blocks_begin_offset: u64,
    header_modified: bool,
}

impl RegionFile {
    pub const FILE_EXTENSION: &'static str = "vxr";

    pub fn new() -> Self {
        RegionFile {
            header: RegionHeader::new(),
            file: None,
            path: PathBuf::new(),
            sectors: SectorTable::new(),
            blocks_begin_offset: 0,
            header_modified: false,
        }
    }

    /// Sets the format used when the file gets created. Only allowed before
    /// [`open`](Self::open); once a file exists its format is immutable.
    pub fn set_format(&mut self, format: RegionFormat) -> Result<()> {
        if self.file.is_some() {
            return Err(RegionError::InvalidArgument(
                "cannot set the format of an open file".to_string(),
            ));
        }
        format.validate()?;

        let volume = format.region_size.volume() as usize;
        self.header.format = format;
        self.header.blocks = vec![BlockInfo::default(); volume];
        Ok(())
    }

    pub fn format(&self) -> &RegionFormat {
        &self.header.format
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Opens the region file at `path`, creating it (and its parent
    /// directories) when missing and `create_if_missing` is set. Creation
    /// writes the header immediately.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, create_if_missing: bool) -> Result<()> {
        let _ = self.close();
        self.path = path.as_ref().to_path_buf();

        match RegionIo::open(&self.path) {
            Ok(mut io) => {
                self.blocks_begin_offset = self.header.load(&mut io)?;
                self.file = Some(io);
            }
            Err(RegionError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound && create_if_missing =>
            {
                let mut io = RegionIo::create(&self.path)?;
                self.header.version = FORMAT_VERSION;
                self.blocks_begin_offset = self.header.store(&mut io)?;
                self.file = Some(io);
            }
            Err(e) => return Err(e),
        }

        // Precompute which block owns each sector; needed to know what moves
        // when sectors are inserted or removed.
        self.sectors = SectorTable::rebuild(&self.header);

        // A legacy header needs rewriting in the current layout; flagging it
        // dirty makes close() run the migration even if nothing was saved.
        self.header_modified = self.header.version != FORMAT_VERSION;
        Ok(())
    }

    /// Flushes the LUT if dirty and releases the file handle. A flush
    /// failure is reported but does not keep the handle open.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.file.is_some() {
            if self.header_modified {
                result = self.save_header();
            }
            self.file = None;
        }
        self.sectors.clear();
        result
    }

    pub fn has_block(&self, position: Vector3i) -> bool {
        if !self.is_open() || !position.is_contained_in(self.header.format.region_size) {
            return false;
        }
        let index = position.to_zxy_index(self.header.format.region_size);
        self.header.blocks[index].is_present()
    }

    pub fn has_block_at(&self, index: usize) -> bool {
        self.is_open()
            && self
                .header
                .blocks
                .get(index)
                .is_some_and(|info| info.is_present())
    }

    /// Number of LUT entries, present or not. Zero while closed.
    pub fn header_block_count(&self) -> usize {
        if !self.is_open() {
            return 0;
        }
        self.header.blocks.len()
    }

    /// Number of occupied sectors in the file.
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// First sector and sector count of a stored block.
    pub fn block_sectors(&self, position: Vector3i) -> Option<(u32, u32)> {
        if !self.is_open() || !position.is_contained_in(self.header.format.region_size) {
            return None;
        }
        let index = position.to_zxy_index(self.header.format.region_size);
        let info = self.header.blocks[index];
        info.is_present()
            .then(|| (info.sector_index(), info.sector_count()))
    }

    /// File offset at which block data begins.
    pub fn blocks_begin_offset(&self) -> u64 {
        self.blocks_begin_offset
    }

    /// Reads and decodes the block at `position` into `out_block`.
    ///
    /// Returns [`RegionError::DoesNotExist`] when the position was never
    /// saved; `out_block` is left untouched in that case.
    pub fn load_block(
        &mut self,
        position: Vector3i,
        out_block: &mut VoxelBlock,
        codec: &impl BlockCodec,
    ) -> Result<()> {
        if self.file.is_none() {
            return Err(not_open());
        }
        let format = &self.header.format;
        if !position.is_contained_in(format.region_size) {
            return Err(RegionError::InvalidArgument(format!(
                "block position {} outside the region",
                position
            )));
        }

        let lut_index = position.to_zxy_index(format.region_size);
        let info = self.header.blocks[lut_index];
        if !info.is_present() {
            return Err(RegionError::DoesNotExist);
        }

        let sector_size = format.sector_size as u64;
        let allocated = info.sector_count() as u64 * sector_size;

        let payload = {
            let Self {
                file,
                blocks_begin_offset,
                ..
            } = self;
            let io = file.as_mut().ok_or_else(not_open)?;
            io.seek_to(*blocks_begin_offset + info.sector_index() as u64 * sector_size)?;
            let data_size = io.read_u32_le()? as u64;
            if data_size + 4 > allocated {
                return Err(RegionError::CorruptBlock(format!(
                    "stored size {} exceeds the {} allocated bytes",
                    data_size, allocated
                )));
            }
            let mut payload = vec![0u8; data_size as usize];
            io.read_exact_or_truncated(&mut payload)?;
            payload
        };

        // Configure the block to the file's channel layout before decoding.
        for (i, depth) in self.header.format.channel_depths.iter().enumerate() {
            out_block.set_channel_depth(i, *depth);
        }
        codec.decode(&payload, out_block)
    }

    /// Encodes and writes a block, reallocating sectors as needed.
    pub fn save_block(
        &mut self,
        position: Vector3i,
        block: &VoxelBlock,
        codec: &impl BlockCodec,
    ) -> Result<()> {
        if self.file.is_none() {
            return Err(not_open());
        }
        self.verify_block_format(block)?;

        // Migrate before any write lands in the old layout.
        if self.header.version != FORMAT_VERSION {
            self.migrate_to_latest()?;
        }

        let format = &self.header.format;
        if !position.is_contained_in(format.region_size) {
            return Err(RegionError::InvalidArgument(format!(
                "block position {} outside the region",
                position
            )));
        }
        let lut_index = position.to_zxy_index(format.region_size);
        let sector_size = format.sector_size as u64;

        let data = codec.encode(block)?;
        let written_size = 4 + data.len() as u64;
        let new_sector_count = sectors_for_bytes(written_size, sector_size);
        if new_sector_count > BlockInfo::MAX_SECTOR_COUNT as u64 {
            return Err(RegionError::InvalidArgument(format!(
                "block needs {} sectors, more than the {} a LUT entry can hold",
                new_sector_count,
                BlockInfo::MAX_SECTOR_COUNT
            )));
        }
        let new_sector_count = new_sector_count as u32;

        let info = self.header.blocks[lut_index];
        if !info.is_present() {
            // The block is not in the file yet, append at the end.
            let sector_index = self.append_block(position, &data)?;
            self.header.blocks[lut_index] = BlockInfo::new(sector_index, new_sector_count);
            self.header_modified = true;
        } else {
            let old_sector_count = info.sector_count();
            debug_assert!(old_sector_count >= 1);

            if new_sector_count <= old_sector_count {
                // Rewrite at the same spot, compacting first on shrink.
                if new_sector_count < old_sector_count {
                    self.remove_sectors_from_block(
                        position,
                        old_sector_count - new_sector_count,
                    )?;
                    self.header_modified = true;
                }
                let offset =
                    self.blocks_begin_offset + info.sector_index() as u64 * sector_size;
                self.write_prefixed(offset, &data)?;
            } else {
                // The block outgrew its run. Shifting everything after it
                // forward would also work; freeing and appending is cheaper
                // for files this small.
                self.remove_sectors_from_block(position, old_sector_count)?;
                let sector_index = self.append_block(position, &data)?;
                self.header.blocks[lut_index] = BlockInfo::new(sector_index, new_sector_count);
                self.header_modified = true;
            }
            self.header.blocks[lut_index].set_sector_count(new_sector_count);
        }

        Ok(())
    }

    /// The block must match the file's geometry and channel depths.
    fn verify_block_format(&self, block: &VoxelBlock) -> Result<()> {
        let format = &self.header.format;
        if block.size() != format.block_size() {
            return Err(RegionError::InvalidArgument(format!(
                "block size {} does not match the format's {}",
                block.size(),
                format.block_size()
            )));
        }
        for (i, depth) in format.channel_depths.iter().enumerate() {
            if block.channel_depth(i) != *depth {
                return Err(RegionError::InvalidArgument(format!(
                    "channel {} depth mismatch",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Writes `data` with its length prefix at the end of the data section,
    /// padded to a whole number of sectors. Returns the first sector index.
    fn append_block(&mut self, position: Vector3i, data: &[u8]) -> Result<u32> {
        let sector_size = self.header.format.sector_size as u64;
        if self.sectors.len() as u64 > BlockInfo::MAX_SECTOR_INDEX as u64 {
            return Err(RegionError::InvalidArgument(
                "region file is full: sector index space exhausted".to_string(),
            ));
        }

        let sector_index = self.sectors.len() as u32;
        let offset = self.blocks_begin_offset + sector_index as u64 * sector_size;
        self.write_prefixed(offset, data)?;
        self.pad_to_sector_size()?;

        let count = sectors_for_bytes(4 + data.len() as u64, sector_size) as u32;
        self.sectors.push(position, count);
        Ok(sector_index)
    }

    /// Length prefix plus payload at a sector-aligned offset.
    fn write_prefixed(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(
            (offset - self.blocks_begin_offset) % self.header.format.sector_size as u64,
            0
        );
        let Self { file, .. } = self;
        let io = file.as_mut().ok_or_else(not_open)?;
        io.seek_to(offset)?;
        io.write_u32_le(data.len() as u32)?;
        io.write_all(data)?;
        debug_assert_eq!(io.position()?, offset + 4 + data.len() as u64);
        Ok(())
    }

    /// Zero-fills from the current position up to the next sector boundary.
    fn pad_to_sector_size(&mut self) -> Result<()> {
        let sector_size = self.header.format.sector_size as u64;
        let Self {
            file,
            blocks_begin_offset,
            ..
        } = self;
        let io = file.as_mut().ok_or_else(not_open)?;
        let position = io.position()?;
        debug_assert!(position >= *blocks_begin_offset);
        let rpos = position - *blocks_begin_offset;
        if rpos == 0 {
            return Ok(());
        }
        let pad = sector_size - 1 - ((rpos - 1) % sector_size);
        io.write_zeros(pad)
    }

    /// Removes the last `removed_count` sectors of a block, compacts every
    /// following sector forward and renumbers their LUT entries. Removing
    /// all of a block's sectors marks it absent. The file is truncated to
    /// the new data end.
    fn remove_sectors_from_block(
        &mut self,
        block_pos: Vector3i,
        removed_count: u32,
    ) -> Result<()> {
        debug_assert!(removed_count > 0);
        let sector_size = self.header.format.sector_size as u64;
        let block_index = block_pos.to_zxy_index(self.header.format.region_size);
        let info = self.header.blocks[block_index];
        debug_assert!(info.is_present());
        debug_assert!(removed_count <= info.sector_count());

        let old_end_offset =
            self.blocks_begin_offset + self.sectors.len() as u64 * sector_size;
        let run_end = (info.sector_index() + info.sector_count()) as u64;
        let mut src = self.blocks_begin_offset + run_end * sector_size;
        let mut dst = src - removed_count as u64 * sector_size;

        {
            let Self { file, .. } = self;
            let io = file.as_mut().ok_or_else(not_open)?;
            let mut sector = vec![0u8; sector_size as usize];
            while src < old_end_offset {
                io.seek_to(src)?;
                io.read_exact_or_truncated(&mut sector)?;
                io.seek_to(dst)?;
                io.write_all(&sector)?;
                src += sector_size;
                dst += sector_size;
            }
        }

        let erase_end = run_end as usize;
        self.sectors
            .remove_range(erase_end - removed_count as usize, removed_count as usize);

        let old_sector_index = info.sector_index();
        let entry = &mut self.header.blocks[block_index];
        if entry.sector_count() > removed_count {
            let reduced = entry.sector_count() - removed_count;
            entry.set_sector_count(reduced);
        } else {
            entry.clear();
        }

        for entry in self.header.blocks.iter_mut() {
            if entry.is_present() && entry.sector_index() > old_sector_index {
                entry.set_sector_index(entry.sector_index() - removed_count);
            }
        }

        // The data section shrank; give the bytes back to the filesystem.
        let new_len = self.blocks_begin_offset + self.sectors.len() as u64 * sector_size;
        {
            let Self { file, .. } = self;
            file.as_mut().ok_or_else(not_open)?.set_len(new_len)?;
        }

        self.header_modified = true;
        Ok(())
    }

    /// Rewrites the header at offset 0, migrating the file first when it
    /// still uses an older version.
    fn save_header(&mut self) -> Result<()> {
        if self.header.version != FORMAT_VERSION {
            self.migrate_to_latest()?;
        }
        let Self {
            header,
            file,
            blocks_begin_offset,
            header_modified,
            ..
        } = self;
        let io = file.as_mut().ok_or_else(not_open)?;
        *blocks_begin_offset = header.store(io)?;
        *header_modified = false;
        Ok(())
    }

    fn migrate_to_latest(&mut self) -> Result<()> {
        match self.header.version {
            FORMAT_VERSION => Ok(()),
            FORMAT_VERSION_LEGACY_2 => self.migrate_from_v2_to_v3(),
            other => Err(RegionError::Unavailable(format!(
                "no migration path from format version {}",
                other
            ))),
        }
    }

    /// Version 2 files carry no format descriptor; the header grows by the
    /// descriptor (and palette) size, which is made room for by shifting
    /// the LUT and all block data forward.
    fn migrate_from_v2_to_v3(&mut self) -> Result<()> {
        // Migration is only possible when the correct format is known up
        // front; version 2 files don't store it.
        if self.header.format.block_size_po2 == 0 {
            return Err(RegionError::Unavailable(
                "cannot migrate a v2 file without a pre-set format".to_string(),
            ));
        }
        info!(path = %self.path.display(), "migrating region file from v2 to v3");

        let old_header_size = self.header.format.region_size.volume() * 4;
        let new_header_size =
            RegionHeader::serialized_size(&self.header.format) - MAGIC_AND_VERSION_SIZE;
        debug_assert!(new_header_size >= old_header_size);
        let extra_bytes_needed = new_header_size - old_header_size;

        {
            let Self { file, .. } = self;
            let io = file.as_mut().ok_or_else(not_open)?;
            io.seek_to(MAGIC_AND_VERSION_SIZE)?;
            io.insert_bytes(extra_bytes_needed)?;
        }

        // Bump the version before rewriting, otherwise save_header would
        // try to migrate again.
        self.header.version = FORMAT_VERSION;
        self.save_header()
    }
}

impl Default for RegionFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), "failed to close region file cleanly: {}", e);
        }
    }
}

fn sectors_for_bytes(size_in_bytes: u64, sector_size: u64) -> u64 {
    debug_assert!(size_in_bytes > 0);
    (size_in_bytes - 1) / sector_size + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressedBlockCodec;
    use tempfile::tempdir;

    fn test_format() -> RegionFormat {
        RegionFormat {
            region_size: Vector3i::splat(2),
            ..Default::default()
        }
    }

    fn filled_block(format: &RegionFormat, seed: u64) -> VoxelBlock {
        let mut block = VoxelBlock::new(format.block_size());
        let side = format.block_size().x;
        for z in 0..side {
            for x in 0..side {
                block.set_voxel(
                    seed.wrapping_add((x + z * side) as u64) & 0xff,
                    Vector3i::new(x, 0, z),
                    0,
                );
            }
        }
        block
    }

    #[test]
    fn test_open_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::new();
        let err = region
            .open(dir.path().join("missing.vxr"), false)
            .unwrap_err();
        assert!(matches!(err, RegionError::Io(_)));
        assert!(!region.is_open());
    }

    #[test]
    fn test_create_writes_header_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.vxr");
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        region.open(&path, true).unwrap();
        assert!(region.is_open());
        assert_eq!(region.header_block_count(), 8);

        let expected = RegionHeader::serialized_size(&test_format());
        assert_eq!(region.blocks_begin_offset(), expected);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_set_format_rejected_when_open() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        region.open(dir.path().join("r.vxr"), true).unwrap();
        assert!(matches!(
            region.set_format(test_format()),
            Err(RegionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_save_rejects_mismatched_block() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        region.open(dir.path().join("r.vxr"), true).unwrap();

        let codec = CompressedBlockCodec::default();
        let wrong_size = VoxelBlock::new(Vector3i::splat(4));
        assert!(matches!(
            region.save_block(Vector3i::new(0, 0, 0), &wrong_size, &codec),
            Err(RegionError::InvalidArgument(_))
        ));

        let mut wrong_depth = VoxelBlock::new(test_format().block_size());
        wrong_depth.set_channel_depth(0, crate::format::Depth::Bits16);
        assert!(matches!(
            region.save_block(Vector3i::new(0, 0, 0), &wrong_depth, &codec),
            Err(RegionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_save_rejects_position_outside_region() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        region.open(dir.path().join("r.vxr"), true).unwrap();

        let codec = CompressedBlockCodec::default();
        let block = filled_block(&test_format(), 1);
        assert!(matches!(
            region.save_block(Vector3i::new(2, 0, 0), &block, &codec),
            Err(RegionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_operations_require_open_file() {
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        let codec = CompressedBlockCodec::default();
        let mut block = VoxelBlock::new(test_format().block_size());

        assert!(region
            .load_block(Vector3i::new(0, 0, 0), &mut block, &codec)
            .is_err());
        assert!(region
            .save_block(Vector3i::new(0, 0, 0), &block, &codec)
            .is_err());
        assert!(!region.has_block(Vector3i::new(0, 0, 0)));
        assert_eq!(region.header_block_count(), 0);
    }

    #[test]
    fn test_save_then_has_block() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::new();
        region.set_format(test_format()).unwrap();
        region.open(dir.path().join("r.vxr"), true).unwrap();

        let codec = CompressedBlockCodec::plain();
        let pos = Vector3i::new(1, 1, 1);
        assert!(!region.has_block(pos));
        region
            .save_block(pos, &VoxelBlock::new(test_format().block_size()), &codec)
            .unwrap();
        assert!(region.has_block(pos));
        assert!(region.has_block_at(pos.to_zxy_index(test_format().region_size)));
        assert_eq!(region.sector_count(), 1);
    }
}
