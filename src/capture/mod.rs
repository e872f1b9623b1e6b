pub mod device;
pub mod ffmpeg;
pub mod lock;
pub mod replay;
pub mod stream;

pub use device::{CaptureConstraints, CaptureDevice, CaptureDeviceFactory};
pub use ffmpeg::{FfmpegCaptureConfig, FfmpegCaptureDevice};
pub use lock::DeviceLock;
pub use replay::ReplayCaptureDevice;
pub use stream::{LiveStream, MediaTrack, RecorderEvent, StreamSource, TrackKind};
