#![no_main]
use libfuzzer_sys::fuzz_target;
use voxreg::{BlockCodec, CompressedBlockCodec, Vector3i, VoxelBlock};

// Corrupt payloads must be rejected cleanly by every compression method
fuzz_target!(|data: &[u8]| {
    for codec in [
        CompressedBlockCodec::plain(),
        CompressedBlockCodec::lz4(),
        CompressedBlockCodec::zstd(),
    ] {
        let mut block = VoxelBlock::new(Vector3i::splat(8));
        let _ = codec.decode(data, &mut block);
    }
});
