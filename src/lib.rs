//! Voxel Region File Format
//!
//! Sector-packed storage for a 3D grid of compressed voxel blocks in a
//! single file, with random-access load and save.
//!
//! ## Features
//!
//! - **Fixed-size sectors** (512 bytes by default) as the on-disk
//!   allocation unit; every block occupies a contiguous run of sectors
//! - **Per-block LUT** in the header for O(1) lookups
//! - **In-place rewrites**: shrinking blocks compact the file, growing
//!   blocks are moved to the end
//! - **Channelized blocks** with per-channel bit depth and uniform-channel
//!   elision
//! - **LZ4/Zstd compression** through a pluggable block codec
//! - **Forward migration** of legacy (v2) files on open
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use voxreg::{CompressedBlockCodec, RegionFile, RegionFormat, Vector3i, VoxelBlock};
//!
//! let format = RegionFormat {
//!     region_size: Vector3i::splat(16),
//!     ..Default::default()
//! };
//!
//! let mut region = RegionFile::new();
//! region.set_format(format.clone())?;
//! region.open("world/region_0_0_0.vxr", true)?;
//!
//! let codec = CompressedBlockCodec::default();
//! let mut block = VoxelBlock::new(format.block_size());
//! block.set_voxel(1, Vector3i::new(3, 4, 5), 0);
//! region.save_block(Vector3i::new(0, 0, 0), &block, &codec)?;
//!
//! let mut loaded = VoxelBlock::new(format.block_size());
//! region.load_block(Vector3i::new(0, 0, 0), &mut loaded, &codec)?;
//! region.close()?;
//! # Ok::<(), voxreg::RegionError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Region File (.vxr)              │
//! ├─────────────────────────────────────────────┤
//! │ Header                                      │
//! │  - Magic "VXR_", version                    │
//! │  - Format: block size, region size,         │
//! │    channel depths, sector size, palette     │
//! │  - LUT: one packed entry per block position │
//! ├─────────────────────────────────────────────┤
//! │ Block data, sector aligned                  │
//! │  - u32 length prefix + compressed payload   │
//! │  - zero padding to the sector boundary      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Writes are not crash-atomic and there is no journaling; callers needing
//! durability must layer it above. One `RegionFile` owns its handle
//! exclusively.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod format;
pub mod header;
pub mod io;
pub mod region;
pub mod sectors;
pub mod vector;

pub use buffer::VoxelBlock;
pub use codec::{BlockCodec, CompressedBlockCodec, CompressionMethod};
pub use error::{RegionError, Result};
pub use format::{Color8, Depth, RegionFormat, CHANNEL_COUNT};
pub use header::{BlockInfo, RegionHeader, FORMAT_VERSION};
pub use io::RegionIo;
pub use region::RegionFile;
pub use sectors::SectorTable;
pub use vector::Vector3i;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
