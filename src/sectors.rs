//! In-memory map from occupied sector to owning block position.

use crate::header::RegionHeader;
use crate::vector::Vector3i;

/// Ordered owners of every occupied sector, in file order.
///
/// Entry `i` is the position of the block occupying sector `i` (relative to
/// the start of block data). Present blocks own contiguous runs; the table
/// has no holes. Rebuilt from the LUT on open, maintained incrementally by
/// saves, dropped on close.
#[derive(Debug, Default)]
pub struct SectorTable {
    owners: Vec<Vector3i>,
}

impl SectorTable {
    pub fn new() -> Self {
        SectorTable { owners: Vec::new() }
    }

    /// Reconstructs the canonical sector assignment from the LUT.
    ///
    /// Present blocks are sorted by their first sector, then each position
    /// is repeated once per owned sector. Ordering is unique because live
    /// ranges are contiguous and disjoint.
    pub fn rebuild(header: &RegionHeader) -> Self {
        let mut present: Vec<(u32, u32, Vector3i)> = header
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, info)| info.is_present())
            .map(|(i, info)| {
                let pos = Vector3i::from_zxy_index(i, header.format.region_size);
                (info.sector_index(), info.sector_count(), pos)
            })
            .collect();
        present.sort_by_key(|&(sector_index, _, _)| sector_index);

        let mut owners = Vec::new();
        for (_, sector_count, pos) in present {
            for _ in 0..sector_count {
                owners.push(pos);
            }
        }
        SectorTable { owners }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Appends `count` sectors owned by `pos` at the end of the file.
    pub fn push(&mut self, pos: Vector3i, count: u32) {
        for _ in 0..count {
            self.owners.push(pos);
        }
    }

    /// Erases `count` entries starting at `start`, closing the gap.
    pub fn remove_range(&mut self, start: usize, count: usize) {
        debug_assert!(start + count <= self.owners.len());
        self.owners.drain(start..start + count);
    }

    pub fn owner(&self, sector: usize) -> Option<Vector3i> {
        self.owners.get(sector).copied()
    }

    pub fn owners(&self) -> &[Vector3i] {
        &self.owners
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }
}
