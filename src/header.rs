//! On-disk header: magic, version, format descriptor and per-block LUT.
//!
//! Layout of version 3:
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ 0      4  Magic "VXR_"                     │
//! │ 4      1  Version (3)                      │
//! │ 5      1  block_size_po2                   │
//! │ 6      3  region_size {x, y, z} as u8      │
//! │ 9      C  channel_depths, one tag per u8   │
//! │ 9+C    2  sector_size (u16 LE)             │
//! │ 11+C   1  Palette flag: 0xFF or 0x00       │
//! │ 12+C  1024 if flagged: 256 × RGBA8         │
//! │ …   vol×4 LUT of packed BlockInfo (u32 LE) │
//! │ …      …  Block data, sector aligned       │
//! └────────────────────────────────────────────┘
//! ```
//!
//! Version 2 has no format descriptor: only magic, version and LUT. The
//! format must then be supplied by the caller before opening.

use crate::error::{RegionError, Result};
use crate::format::{Color8, Depth, RegionFormat, CHANNEL_COUNT};
use std::io::{Read, Seek, Write};

pub const MAGIC: [u8; 4] = *b"VXR_";

pub const FORMAT_VERSION: u8 = 3;

/// Like version 3, but does not include any format information.
pub const FORMAT_VERSION_LEGACY_2: u8 = 2;

pub const MAGIC_AND_VERSION_SIZE: u64 = 4 + 1;
pub const FIXED_HEADER_DATA_SIZE: u64 = 7 + CHANNEL_COUNT as u64;
pub const PALETTE_SIZE_IN_BYTES: u64 = 256 * 4;

/// Packed LUT entry: sector index in the high 24 bits, sector count in the
/// low 8. All zero means the block is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockInfo(pub u32);

impl BlockInfo {
    pub const MAX_SECTOR_INDEX: u32 = 0xff_ffff;
    pub const MAX_SECTOR_COUNT: u32 = 0xff;

    pub fn new(sector_index: u32, sector_count: u32) -> Self {
        let mut info = BlockInfo(0);
        info.set_sector_index(sector_index);
        info.set_sector_count(sector_count);
        info
    }

    pub fn is_present(self) -> bool {
        self.0 != 0
    }

    pub fn sector_index(self) -> u32 {
        self.0 >> 8
    }

    pub fn sector_count(self) -> u32 {
        self.0 & 0xff
    }

    pub fn set_sector_index(&mut self, index: u32) {
        debug_assert!(index <= Self::MAX_SECTOR_INDEX);
        self.0 = (self.0 & 0xff) | (index << 8);
    }

    pub fn set_sector_count(&mut self, count: u32) {
        debug_assert!((1..=Self::MAX_SECTOR_COUNT).contains(&count));
        self.0 = (self.0 & !0xff) | count;
    }

    /// Marks the block absent.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// In-memory image of the file header.
#[derive(Debug, Clone)]
pub struct RegionHeader {
    pub version: u8,
    pub format: RegionFormat,
    pub blocks: Vec<BlockInfo>,
}

impl RegionHeader {
    pub fn new() -> Self {
        let format = RegionFormat::default();
        let volume = format.region_size.volume() as usize;
        RegionHeader {
            version: FORMAT_VERSION,
            format,
            blocks: vec![BlockInfo::default(); volume],
        }
    }

    /// Size in bytes of the version 3 header for `format`, which is also the
    /// file offset at which block data begins.
    pub fn serialized_size(format: &RegionFormat) -> u64 {
        MAGIC_AND_VERSION_SIZE
            + FIXED_HEADER_DATA_SIZE
            + if format.has_palette {
                PALETTE_SIZE_IN_BYTES
            } else {
                0
            }
            + format.region_size.volume() * 4
    }

    /// Reads the header from the start of the stream. Returns the offset at
    /// which block data begins.
    ///
    /// For a legacy version 2 file the in-memory format is kept as-is and
    /// only the LUT is read; the caller must have supplied the correct
    /// format beforehand.
    pub fn load<R: Read + Seek>(&mut self, r: &mut R) -> Result<u64> {
        let magic = read_array::<_, 4>(r)?;
        if magic != MAGIC {
            return Err(RegionError::InvalidMagic);
        }

        let version = read_array::<_, 1>(r)?[0];
        match version {
            FORMAT_VERSION => {
                self.format.block_size_po2 = read_array::<_, 1>(r)?[0];

                let extent = read_array::<_, 3>(r)?;
                self.format.region_size.x = extent[0] as i32;
                self.format.region_size.y = extent[1] as i32;
                self.format.region_size.z = extent[2] as i32;

                for depth in self.format.channel_depths.iter_mut() {
                    *depth = Depth::from_u8(read_array::<_, 1>(r)?[0])?;
                }

                self.format.sector_size = u16::from_le_bytes(read_array::<_, 2>(r)?);

                let palette_marker = read_array::<_, 1>(r)?[0];
                match palette_marker {
                    0xff => {
                        self.format.has_palette = true;
                        let mut raw = [0u8; PALETTE_SIZE_IN_BYTES as usize];
                        read_exact_or_truncated(r, &mut raw)?;
                        for (color, rgba) in
                            self.format.palette.iter_mut().zip(raw.chunks_exact(4))
                        {
                            *color = Color8 {
                                r: rgba[0],
                                g: rgba[1],
                                b: rgba[2],
                                a: rgba[3],
                            };
                        }
                    }
                    0x00 => {
                        self.format.has_palette = false;
                    }
                    other => return Err(RegionError::InvalidPaletteMarker(other)),
                }
            }
            FORMAT_VERSION_LEGACY_2 => {
                // No descriptor on disk; trust the pre-set format.
            }
            other => return Err(RegionError::UnsupportedVersion(other)),
        }
        self.version = version;

        let volume = self.format.region_size.volume() as usize;
        let mut raw = vec![0u8; volume * 4];
        read_exact_or_truncated(r, &mut raw)?;
        self.blocks.clear();
        self.blocks.extend(
            raw.chunks_exact(4)
                .map(|b| BlockInfo(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
        );

        Ok(r.stream_position()?)
    }

    /// Writes the version 3 header at the start of the stream. Returns the
    /// offset at which block data begins.
    pub fn store<W: Write + Seek>(&self, w: &mut W) -> Result<u64> {
        // Migration must have happened before getting here.
        assert_eq!(self.version, FORMAT_VERSION);

        w.seek(std::io::SeekFrom::Start(0))?;
        w.write_all(&MAGIC)?;
        w.write_all(&[self.version])?;

        w.write_all(&[self.format.block_size_po2])?;
        w.write_all(&[
            self.format.region_size.x as u8,
            self.format.region_size.y as u8,
            self.format.region_size.z as u8,
        ])?;

        for depth in self.format.channel_depths.iter() {
            w.write_all(&[*depth as u8])?;
        }

        w.write_all(&self.format.sector_size.to_le_bytes())?;

        if self.format.has_palette {
            w.write_all(&[0xff])?;
            let mut raw = Vec::with_capacity(PALETTE_SIZE_IN_BYTES as usize);
            for color in self.format.palette.iter() {
                raw.extend_from_slice(&[color.r, color.g, color.b, color.a]);
            }
            w.write_all(&raw)?;
        } else {
            w.write_all(&[0x00])?;
        }

        let mut raw = Vec::with_capacity(self.blocks.len() * 4);
        for info in self.blocks.iter() {
            raw.extend_from_slice(&info.0.to_le_bytes());
        }
        w.write_all(&raw)?;

        let blocks_begin = w.stream_position()?;
        debug_assert_eq!(blocks_begin, Self::serialized_size(&self.format));
        Ok(blocks_begin)
    }
}

impl Default for RegionHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact_or_truncated(r, &mut buf)?;
    Ok(buf)
}

fn read_exact_or_truncated<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RegionError::TruncatedFile
        } else {
            RegionError::Io(e)
        }
    })
}
