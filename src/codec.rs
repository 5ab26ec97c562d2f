//! Block serialization and compression.
//!
//! Payload layout before compression: block extents as three u16, then per
//! channel a depth tag, the uniform value (u64), and either a uniform marker
//! or the dense voxel array. The compressed stream is prefixed with a method
//! byte so files can mix methods across blocks.

use crate::buffer::VoxelBlock;
use crate::error::{RegionError, Result};
use crate::format::{Depth, CHANNEL_COUNT};
use crate::vector::Vector3i;

/// Upper bound for a decompressed block payload. The sector addressing
/// scheme cannot store blocks anywhere near this large.
const MAX_DECOMPRESSED_SIZE: usize = 32 * 1024 * 1024;

const CHANNEL_UNIFORM: u8 = 0;
const CHANNEL_DENSE: u8 = 1;

/// Serializes voxel blocks to bytes and back.
///
/// Implementations must be deterministic: encoding the same block twice
/// yields the same bytes.
pub trait BlockCodec {
    fn encode(&self, block: &VoxelBlock) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8], out_block: &mut VoxelBlock) -> Result<()>;
}

/// Compression applied to a serialized block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    /// Fast, moderate ratio.
    Lz4 = 1,
    /// Slower, better ratio.
    Zstd = 2,
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Lz4),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Default codec: channel serialization plus whole-payload compression.
#[derive(Debug, Clone, Copy)]
pub struct CompressedBlockCodec {
    pub method: CompressionMethod,
}

impl CompressedBlockCodec {
    pub fn lz4() -> Self {
        CompressedBlockCodec {
            method: CompressionMethod::Lz4,
        }
    }

    pub fn zstd() -> Self {
        CompressedBlockCodec {
            method: CompressionMethod::Zstd,
        }
    }

    /// No compression; useful for tests and diagnostics.
    pub fn plain() -> Self {
        CompressedBlockCodec {
            method: CompressionMethod::None,
        }
    }
}

impl Default for CompressedBlockCodec {
    fn default() -> Self {
        Self::lz4()
    }
}

impl BlockCodec for CompressedBlockCodec {
    fn encode(&self, block: &VoxelBlock) -> Result<Vec<u8>> {
        let payload = serialize_channels(block);
        let mut out = Vec::with_capacity(payload.len() / 2 + 1);
        out.push(self.method as u8);
        match self.method {
            CompressionMethod::None => out.extend_from_slice(&payload),
            CompressionMethod::Lz4 => {
                out.extend_from_slice(&lz4_flex::compress_prepend_size(&payload));
            }
            CompressionMethod::Zstd => {
                let compressed = zstd::bulk::compress(&payload, 3)
                    .map_err(|e| RegionError::CorruptBlock(format!("zstd: {}", e)))?;
                out.extend_from_slice(&compressed);
            }
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8], out_block: &mut VoxelBlock) -> Result<()> {
        let (&method_byte, compressed) = bytes
            .split_first()
            .ok_or_else(|| RegionError::CorruptBlock("empty payload".to_string()))?;
        let method = CompressionMethod::from_u8(method_byte).ok_or_else(|| {
            RegionError::CorruptBlock(format!("unknown compression method {}", method_byte))
        })?;

        let payload = match method {
            CompressionMethod::None => compressed.to_vec(),
            CompressionMethod::Lz4 => lz4_flex::decompress_size_prepended(compressed)
                .map_err(|e| RegionError::CorruptBlock(format!("lz4: {}", e)))?,
            CompressionMethod::Zstd => {
                zstd::bulk::decompress(compressed, MAX_DECOMPRESSED_SIZE)
                    .map_err(|e| RegionError::CorruptBlock(format!("zstd: {}", e)))?
            }
        };
        deserialize_channels(&payload, out_block)
    }
}

fn serialize_channels(block: &VoxelBlock) -> Vec<u8> {
    let size = block.size();
    let mut out = Vec::new();
    out.extend_from_slice(&(size.x as u16).to_le_bytes());
    out.extend_from_slice(&(size.y as u16).to_le_bytes());
    out.extend_from_slice(&(size.z as u16).to_le_bytes());

    for i in 0..CHANNEL_COUNT {
        out.push(block.channel_depth(i) as u8);
        out.extend_from_slice(&block.channel_defval(i).to_le_bytes());
        match block.channel_data(i) {
            None => out.push(CHANNEL_UNIFORM),
            Some(data) => {
                out.push(CHANNEL_DENSE);
                out.extend_from_slice(data);
            }
        }
    }
    out
}

fn deserialize_channels(payload: &[u8], out_block: &mut VoxelBlock) -> Result<()> {
    let mut reader = SliceReader { payload, at: 0 };

    let x = u16::from_le_bytes(reader.take_array::<2>()?) as i32;
    let y = u16::from_le_bytes(reader.take_array::<2>()?) as i32;
    let z = u16::from_le_bytes(reader.take_array::<2>()?) as i32;
    let size = Vector3i::new(x, y, z);
    if size.volume() == 0 || size.volume() as usize > MAX_DECOMPRESSED_SIZE {
        return Err(RegionError::CorruptBlock(format!(
            "unreasonable block size {}",
            size
        )));
    }
    out_block.create(size);

    for i in 0..CHANNEL_COUNT {
        let depth = Depth::from_u8(reader.take_array::<1>()?[0])
            .map_err(|_| RegionError::CorruptBlock(format!("bad depth for channel {}", i)))?;
        out_block.set_channel_depth(i, depth);

        let defval = u64::from_le_bytes(reader.take_array::<8>()?);
        out_block.fill(defval, i);

        match reader.take_array::<1>()?[0] {
            CHANNEL_UNIFORM => {}
            CHANNEL_DENSE => {
                let len = size.volume() as usize * depth.byte_count();
                let data = reader.take(len)?.to_vec();
                out_block.set_channel_data(i, data)?;
            }
            other => {
                return Err(RegionError::CorruptBlock(format!(
                    "bad channel marker {}",
                    other
                )))
            }
        }
    }

    if reader.at != payload.len() {
        return Err(RegionError::CorruptBlock(format!(
            "{} trailing bytes",
            payload.len() - reader.at
        )));
    }
    Ok(())
}

struct SliceReader<'a> {
    payload: &'a [u8],
    at: usize,
}

impl<'a> SliceReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.at + len > self.payload.len() {
            return Err(RegionError::CorruptBlock("payload too short".to_string()));
        }
        let slice = &self.payload[self.at..self.at + len];
        self.at += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> VoxelBlock {
        let mut block = VoxelBlock::new(Vector3i::splat(8));
        block.set_channel_depth(1, Depth::Bits16);
        block.fill(3, 2);
        for z in 0..8 {
            for x in 0..8 {
                for y in 0..4 {
                    block.set_voxel((x * y + z) as u64, Vector3i::new(x, y, z), 0);
                    block.set_voxel(1000 + x as u64, Vector3i::new(x, y, z), 1);
                }
            }
        }
        block
    }

    #[test]
    fn test_round_trip_lz4() {
        let block = sample_block();
        let codec = CompressedBlockCodec::lz4();
        let bytes = codec.encode(&block).unwrap();

        let mut decoded = VoxelBlock::new(Vector3i::splat(1));
        codec.decode(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_round_trip_zstd() {
        let block = sample_block();
        let codec = CompressedBlockCodec::zstd();
        let bytes = codec.encode(&block).unwrap();

        let mut decoded = VoxelBlock::new(Vector3i::splat(1));
        codec.decode(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_round_trip_plain() {
        let block = sample_block();
        let codec = CompressedBlockCodec::plain();
        let bytes = codec.encode(&block).unwrap();

        let mut decoded = VoxelBlock::new(Vector3i::splat(1));
        codec.decode(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let block = sample_block();
        let codec = CompressedBlockCodec::default();
        assert_eq!(codec.encode(&block).unwrap(), codec.encode(&block).unwrap());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let codec = CompressedBlockCodec::default();
        let mut out = VoxelBlock::new(Vector3i::splat(1));
        assert!(matches!(
            codec.decode(&[99, 0, 0], &mut out),
            Err(RegionError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let block = sample_block();
        let codec = CompressedBlockCodec::plain();
        let mut bytes = codec.encode(&block).unwrap();
        bytes.push(0xab);

        let mut out = VoxelBlock::new(Vector3i::splat(1));
        assert!(matches!(
            codec.decode(&bytes, &mut out),
            Err(RegionError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let codec = CompressedBlockCodec::default();
        let mut out = VoxelBlock::new(Vector3i::splat(1));
        assert!(codec.decode(&[], &mut out).is_err());
    }

    #[test]
    fn test_uniform_block_is_tiny() {
        let block = VoxelBlock::new(Vector3i::splat(16));
        let codec = CompressedBlockCodec::lz4();
        let bytes = codec.encode(&block).unwrap();
        // 4096 voxels across 8 channels, all uniform: nothing dense stored
        assert!(bytes.len() < 128);
    }
}
