//! Region format descriptor: geometry, channel depths, sector size, palette.

use crate::error::{RegionError, Result};
use crate::vector::Vector3i;
use serde::{Deserialize, Serialize};

/// Number of voxel channels carried by every block.
pub const CHANNEL_COUNT: usize = 8;

/// Maximum region extent along one axis, in blocks.
pub const MAX_BLOCKS_ACROSS: i32 = 256;

/// Bit depth of one voxel channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Depth {
    Bits8 = 0,
    Bits16 = 1,
    Bits32 = 2,
    Bits64 = 3,
}

impl Depth {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Depth::Bits8),
            1 => Ok(Depth::Bits16),
            2 => Ok(Depth::Bits32),
            3 => Ok(Depth::Bits64),
            other => Err(RegionError::InvalidDepth(other)),
        }
    }

    pub const fn byte_count(self) -> usize {
        match self {
            Depth::Bits8 => 1,
            Depth::Bits16 => 2,
            Depth::Bits32 => 4,
            Depth::Bits64 => 8,
        }
    }

    pub const fn bit_count(self) -> usize {
        self.byte_count() * 8
    }
}

/// RGBA8 palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Describes the geometry and encoding of one region file.
///
/// Immutable for the lifetime of a file: it is written into the v3 header on
/// creation and read back on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFormat {
    /// Each block is a cube of side `1 << block_size_po2` voxels.
    pub block_size_po2: u8,

    /// Region extent in blocks, each component in `[0, 256)`.
    pub region_size: Vector3i,

    /// Bit depth of each voxel channel.
    pub channel_depths: [Depth; CHANNEL_COUNT],

    /// On-disk allocation unit in bytes.
    pub sector_size: u16,

    pub has_palette: bool,

    /// 256-entry RGBA8 palette, only stored when `has_palette` is set.
    #[serde(with = "serde_arrays")]
    pub palette: [Color8; 256],
}

// Serde does not derive for arrays past 32 entries; route the palette
// through a Vec.
mod serde_arrays {
    use super::Color8;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[Color8; 256], s: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[Color8; 256], D::Error> {
        let v = Vec::<Color8>::deserialize(d)?;
        let len = v.len();
        v.try_into()
            .map_err(|_| serde::de::Error::invalid_length(len, &"256 palette entries"))
    }
}

impl Default for RegionFormat {
    fn default() -> Self {
        RegionFormat {
            block_size_po2: 4,
            region_size: Vector3i::splat(16),
            channel_depths: [Depth::Bits8; CHANNEL_COUNT],
            sector_size: 512,
            has_palette: false,
            palette: [Color8::default(); 256],
        }
    }
}

impl RegionFormat {
    /// Side length of one block, in voxels.
    pub fn block_size(&self) -> Vector3i {
        Vector3i::splat(1 << self.block_size_po2)
    }

    /// Uncompressed size of one block if every channel is stored densely.
    pub fn worst_case_block_bytes(&self) -> u64 {
        let bytes_per_voxel: u64 = self
            .channel_depths
            .iter()
            .map(|d| d.byte_count() as u64)
            .sum();
        bytes_per_voxel * self.block_size().volume()
    }

    /// Checks bounds and worst-case sector math before a file is created.
    pub fn validate(&self) -> Result<()> {
        if self.block_size_po2 == 0 {
            return Err(RegionError::InvalidArgument(
                "block_size_po2 must be positive".to_string(),
            ));
        }
        for c in [self.region_size.x, self.region_size.y, self.region_size.z] {
            if !(0..MAX_BLOCKS_ACROSS).contains(&c) {
                return Err(RegionError::InvalidArgument(format!(
                    "region size component {} out of range [0, {})",
                    c, MAX_BLOCKS_ACROSS
                )));
            }
        }
        if self.sector_size == 0 {
            return Err(RegionError::InvalidArgument(
                "sector size must be positive".to_string(),
            ));
        }

        // Worst case limits. This does not account for arbitrary metadata,
        // so it cannot be 100% accurate.
        let sectors_per_block =
            (self.worst_case_block_bytes() - 1) / self.sector_size as u64 + 1;
        if sectors_per_block > crate::header::BlockInfo::MAX_SECTOR_COUNT as u64 {
            return Err(RegionError::InvalidArgument(format!(
                "worst case of {} sectors per block exceeds the limit of {}",
                sectors_per_block,
                crate::header::BlockInfo::MAX_SECTOR_COUNT
            )));
        }
        let max_potential_sectors = self.region_size.volume() * sectors_per_block;
        if max_potential_sectors > crate::header::BlockInfo::MAX_SECTOR_INDEX as u64 {
            return Err(RegionError::InvalidArgument(format!(
                "worst case of {} sectors exceeds the addressable {}",
                max_potential_sectors,
                crate::header::BlockInfo::MAX_SECTOR_INDEX
            )));
        }
        Ok(())
    }
}
