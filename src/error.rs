use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Block does not exist in the region")]
    DoesNotExist,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid channel depth tag: {0}")]
    InvalidDepth(u8),

    #[error("Invalid palette marker byte: {0:#04x}")]
    InvalidPaletteMarker(u8),

    #[error("File ends before the expected data")]
    TruncatedFile,

    #[error("Corrupt block payload: {0}")]
    CorruptBlock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot create containing directory for {0}")]
    CantCreate(PathBuf),
}

pub type Result<T> = std::result::Result<T, RegionError>;
