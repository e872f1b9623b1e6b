//! Reference media handling
//!
//! The reference asset is the video the user dances along to. A
//! `MediaSourceHandle` binds it, resolves its duration (priming) and exposes
//! play/pause transport plus a natural "ended" signal.

pub mod file;
pub mod handle;

pub use file::FileMediaSource;
pub use handle::{validate_duration, MediaSourceHandle, PlaybackEnded, ReferenceAsset};
