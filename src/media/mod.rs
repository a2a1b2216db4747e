//! Video indexing and thumbnail generation

pub mod frames;
pub mod indexer;
pub mod thumbnails;

pub use frames::{ExtractError, FfmpegExtractor, FrameExtractor};
pub use indexer::{CycleStats, MediaIndex, VideoEntry};
pub use thumbnails::{ThumbnailCache, thumbnail_key};
