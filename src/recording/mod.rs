//! Recording of the live stream
//!
//! A `RecordingSession` attaches an encoder to a `LiveStream`, accumulates the
//! encoded chunks in a `CaptureBuffer` and seals them into a single
//! `RecordingArtifact` on stop.

pub mod buffer;
pub mod session;

pub use buffer::{CaptureBuffer, RecordingArtifact};
pub use session::{EncodingHint, RecorderState, RecordingSession};
