use std::io;

/// All error types for tile-archive decoding.
///
/// Stream and structural errors are fatal for the tile being parsed;
/// resource errors are recoverable and reported only to the resolver
/// call that triggered them.
#[derive(thiserror::Error, Debug)]
pub enum TileGraphError {
    #[error("Token stream truncated: {0}")]
    StreamTruncated(String),
    #[error("Structural imbalance: {0}")]
    StructuralImbalance(String),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Model index {index} out of range for reference table of {len}")]
    ModelIndexOutOfRange { index: usize, len: usize },
    #[error("Resource load error: {0}")]
    ResourceLoad(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TileGraphError>;
