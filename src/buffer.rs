//! Channelized voxel block container.
//!
//! A block is a dense 3D grid of voxels with [`CHANNEL_COUNT`] independent
//! channels (terrain type, isolevel, material, ...). A channel that holds a
//! single value everywhere stays unallocated and only stores that value;
//! writing a differing voxel materializes the dense array.

use crate::error::{RegionError, Result};
use crate::format::{Depth, CHANNEL_COUNT};
use crate::vector::Vector3i;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Channel {
    depth: Depth,
    defval: u64,
    /// Dense voxel values in ZXY order, `depth.byte_count()` bytes each,
    /// little-endian. `None` while the channel is uniform.
    data: Option<Vec<u8>>,
}

impl Channel {
    fn new() -> Self {
        Channel {
            depth: Depth::Bits8,
            defval: 0,
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelBlock {
    size: Vector3i,
    channels: [Channel; CHANNEL_COUNT],
}

impl VoxelBlock {
    pub fn new(size: Vector3i) -> Self {
        VoxelBlock {
            size,
            channels: std::array::from_fn(|_| Channel::new()),
        }
    }

    pub fn size(&self) -> Vector3i {
        self.size
    }

    pub fn volume(&self) -> usize {
        self.size.volume() as usize
    }

    /// Changes the block extents. Allocated channels are re-created at the
    /// new size and lose their contents.
    pub fn create(&mut self, size: Vector3i) {
        if size.x <= 0 || size.y <= 0 || size.z <= 0 {
            return;
        }
        if size != self.size {
            self.size = size;
            for i in 0..CHANNEL_COUNT {
                if self.channels[i].data.is_some() {
                    self.allocate_channel(i);
                }
            }
        }
    }

    pub fn channel_depth(&self, channel_index: usize) -> Depth {
        self.channels[channel_index].depth
    }

    /// Sets the bit depth of a channel. Dense contents, if any, are dropped
    /// because the stride changes.
    pub fn set_channel_depth(&mut self, channel_index: usize, depth: Depth) {
        let channel = &mut self.channels[channel_index];
        if channel.depth != depth {
            channel.depth = depth;
            channel.data = None;
            channel.defval = truncate_to_depth(channel.defval, depth);
        }
    }

    pub fn voxel_at(&self, pos: Vector3i, channel_index: usize) -> u64 {
        let channel = &self.channels[channel_index];
        if !pos.is_contained_in(self.size) {
            return channel.defval;
        }
        match &channel.data {
            Some(data) => read_value(data, pos.to_zxy_index(self.size), channel.depth),
            None => channel.defval,
        }
    }

    pub fn set_voxel(&mut self, value: u64, pos: Vector3i, channel_index: usize) {
        if !pos.is_contained_in(self.size) {
            return;
        }
        let value = truncate_to_depth(value, self.channels[channel_index].depth);
        if self.channels[channel_index].data.is_none() {
            if self.channels[channel_index].defval == value {
                return;
            }
            self.allocate_channel(channel_index);
        }
        let index = pos.to_zxy_index(self.size);
        let channel = &mut self.channels[channel_index];
        write_value(
            channel.data.as_mut().unwrap(),
            index,
            channel.depth,
            value,
        );
    }

    /// Makes the channel uniform with the given value, dropping any dense
    /// storage.
    pub fn fill(&mut self, value: u64, channel_index: usize) {
        let channel = &mut self.channels[channel_index];
        channel.defval = truncate_to_depth(value, channel.depth);
        channel.data = None;
    }

    pub fn is_uniform(&self, channel_index: usize) -> bool {
        let channel = &self.channels[channel_index];
        let data = match &channel.data {
            Some(data) => data,
            None => return true,
        };
        let stride = channel.depth.byte_count();
        let first = &data[..stride];
        data.chunks_exact(stride).all(|v| v == first)
    }

    /// Turns channels that became uniform back into unallocated ones.
    pub fn compress_uniform_channels(&mut self) {
        for i in 0..CHANNEL_COUNT {
            if self.channels[i].data.is_some() && self.is_uniform(i) {
                let value = self.voxel_at(Vector3i::new(0, 0, 0), i);
                self.fill(value, i);
            }
        }
    }

    /// Copies one whole channel from another block of the same size.
    pub fn copy_from(&mut self, other: &VoxelBlock, channel_index: usize) -> Result<()> {
        if other.size != self.size {
            return Err(RegionError::InvalidArgument(format!(
                "block size mismatch: {} vs {}",
                other.size, self.size
            )));
        }
        let src = &other.channels[channel_index];
        let dst = &mut self.channels[channel_index];
        dst.depth = src.depth;
        dst.defval = src.defval;
        dst.data = src.data.clone();
        Ok(())
    }

    /// Copies the voxels of `other` within `[src_min, src_max)` into this
    /// block starting at `dst_min`, one channel. Bounds are clamped.
    pub fn copy_channel_from(
        &mut self,
        other: &VoxelBlock,
        src_min: Vector3i,
        src_max: Vector3i,
        dst_min: Vector3i,
        channel_index: usize,
    ) {
        let zero = Vector3i::new(0, 0, 0);
        let src_min = src_min.clamped_to(zero, other.size);
        let src_max = src_max.clamped_to(zero, other.size);
        let dst_min = dst_min.clamped_to(zero, self.size);
        let area = src_max - src_min;

        for rz in 0..area.z {
            for rx in 0..area.x {
                for ry in 0..area.y {
                    let rel = Vector3i::new(rx, ry, rz);
                    let dst = dst_min + rel;
                    if !dst.is_contained_in(self.size) {
                        continue;
                    }
                    let value = other.voxel_at(src_min + rel, channel_index);
                    self.set_voxel(value, dst, channel_index);
                }
            }
        }
    }

    /// Raw dense contents of a channel, `None` while uniform.
    pub fn channel_data(&self, channel_index: usize) -> Option<&[u8]> {
        self.channels[channel_index].data.as_deref()
    }

    /// Uniform value of a channel (the default for unwritten voxels).
    pub fn channel_defval(&self, channel_index: usize) -> u64 {
        self.channels[channel_index].defval
    }

    /// Installs dense contents for a channel. The byte length must match
    /// `volume * depth.byte_count()`.
    pub fn set_channel_data(&mut self, channel_index: usize, data: Vec<u8>) -> Result<()> {
        let channel = &mut self.channels[channel_index];
        let expected = self.size.volume() as usize * channel.depth.byte_count();
        if data.len() != expected {
            return Err(RegionError::InvalidArgument(format!(
                "channel payload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        channel.data = Some(data);
        Ok(())
    }

    fn allocate_channel(&mut self, channel_index: usize) {
        let volume = self.volume();
        let channel = &mut self.channels[channel_index];
        let stride = channel.depth.byte_count();
        let mut data = vec![0u8; volume * stride];
        if channel.defval != 0 {
            for i in 0..volume {
                write_value(&mut data, i, channel.depth, channel.defval);
            }
        }
        channel.data = Some(data);
    }
}

fn truncate_to_depth(value: u64, depth: Depth) -> u64 {
    match depth {
        Depth::Bits8 => value & 0xff,
        Depth::Bits16 => value & 0xffff,
        Depth::Bits32 => value & 0xffff_ffff,
        Depth::Bits64 => value,
    }
}

fn read_value(data: &[u8], index: usize, depth: Depth) -> u64 {
    let at = index * depth.byte_count();
    match depth {
        Depth::Bits8 => data[at] as u64,
        Depth::Bits16 => u16::from_le_bytes([data[at], data[at + 1]]) as u64,
        Depth::Bits32 => {
            u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as u64
        }
        Depth::Bits64 => u64::from_le_bytes(data[at..at + 8].try_into().unwrap()),
    }
}

fn write_value(data: &mut [u8], index: usize, depth: Depth, value: u64) {
    let at = index * depth.byte_count();
    match depth {
        Depth::Bits8 => data[at] = value as u8,
        Depth::Bits16 => data[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        Depth::Bits32 => data[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes()),
        Depth::Bits64 => data[at..at + 8].copy_from_slice(&value.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_uniform() {
        let block = VoxelBlock::new(Vector3i::splat(16));
        for i in 0..CHANNEL_COUNT {
            assert!(block.is_uniform(i));
            assert_eq!(block.voxel_at(Vector3i::new(3, 4, 5), i), 0);
        }
    }

    #[test]
    fn test_set_voxel_materializes_channel() {
        let mut block = VoxelBlock::new(Vector3i::splat(4));
        let pos = Vector3i::new(1, 2, 3);

        // Writing the uniform value changes nothing
        block.set_voxel(0, pos, 0);
        assert!(block.channel_data(0).is_none());

        block.set_voxel(42, pos, 0);
        assert!(block.channel_data(0).is_some());
        assert_eq!(block.voxel_at(pos, 0), 42);
        assert_eq!(block.voxel_at(Vector3i::new(0, 0, 0), 0), 0);
    }

    #[test]
    fn test_depth_truncation() {
        let mut block = VoxelBlock::new(Vector3i::splat(2));
        block.set_channel_depth(1, Depth::Bits16);
        block.set_voxel(0x12345, Vector3i::new(0, 0, 0), 1);
        assert_eq!(block.voxel_at(Vector3i::new(0, 0, 0), 1), 0x2345);
    }

    #[test]
    fn test_wide_depth_round_trip() {
        let mut block = VoxelBlock::new(Vector3i::splat(2));
        block.set_channel_depth(2, Depth::Bits64);
        let value = 0x0123_4567_89ab_cdef;
        block.set_voxel(value, Vector3i::new(1, 1, 1), 2);
        assert_eq!(block.voxel_at(Vector3i::new(1, 1, 1), 2), value);
    }

    #[test]
    fn test_fill_and_compress_uniform() {
        let mut block = VoxelBlock::new(Vector3i::splat(4));
        block.set_voxel(7, Vector3i::new(0, 0, 0), 0);
        assert!(block.channel_data(0).is_some());

        // Overwrite every voxel with the same value, then shrink back
        for z in 0..4 {
            for x in 0..4 {
                for y in 0..4 {
                    block.set_voxel(9, Vector3i::new(x, y, z), 0);
                }
            }
        }
        assert!(block.is_uniform(0));
        block.compress_uniform_channels();
        assert!(block.channel_data(0).is_none());
        assert_eq!(block.voxel_at(Vector3i::new(2, 2, 2), 0), 9);

        block.fill(1, 0);
        assert_eq!(block.voxel_at(Vector3i::new(3, 3, 3), 0), 1);
    }

    #[test]
    fn test_copy_from_requires_same_size() {
        let src = VoxelBlock::new(Vector3i::splat(4));
        let mut dst = VoxelBlock::new(Vector3i::splat(8));
        assert!(matches!(
            dst.copy_from(&src, 0),
            Err(RegionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_copy_from_channel() {
        let mut src = VoxelBlock::new(Vector3i::splat(4));
        src.set_voxel(5, Vector3i::new(1, 1, 1), 3);
        let mut dst = VoxelBlock::new(Vector3i::splat(4));
        dst.copy_from(&src, 3).unwrap();
        assert_eq!(dst.voxel_at(Vector3i::new(1, 1, 1), 3), 5);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_windowed_copy_clamps() {
        let mut src = VoxelBlock::new(Vector3i::splat(4));
        for z in 0..4 {
            for x in 0..4 {
                for y in 0..4 {
                    src.set_voxel(
                        (x + y * 10 + z * 100) as u64,
                        Vector3i::new(x, y, z),
                        0,
                    );
                }
            }
        }

        let mut dst = VoxelBlock::new(Vector3i::splat(4));
        dst.copy_channel_from(
            &src,
            Vector3i::new(1, 1, 1),
            Vector3i::new(3, 3, 3),
            Vector3i::new(2, 2, 2),
            0,
        );
        assert_eq!(
            dst.voxel_at(Vector3i::new(2, 2, 2), 0),
            src.voxel_at(Vector3i::new(1, 1, 1), 0)
        );
        assert_eq!(
            dst.voxel_at(Vector3i::new(3, 3, 3), 0),
            src.voxel_at(Vector3i::new(2, 2, 2), 0)
        );
        // Outside the destination window: untouched
        assert_eq!(dst.voxel_at(Vector3i::new(0, 0, 0), 0), 0);
    }

    #[test]
    fn test_create_resizes_and_clears() {
        let mut block = VoxelBlock::new(Vector3i::splat(4));
        block.set_voxel(3, Vector3i::new(0, 0, 0), 0);
        block.create(Vector3i::splat(8));
        assert_eq!(block.size(), Vector3i::splat(8));
        assert_eq!(block.voxel_at(Vector3i::new(0, 0, 0), 0), 0);
    }
}
