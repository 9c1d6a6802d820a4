//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod frame;
pub mod playback;
pub mod queue;

pub use capture::CaptureEngine;
pub use device::{default_input_device, default_output_device};
pub use frame::{AudioFrame, FrameFormat};
pub use playback::PlaybackEngine;
pub use queue::{PlaybackQueue, PlaybackQueues};
