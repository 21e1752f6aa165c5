pub mod replay;
pub mod source;
pub mod synthetic;

pub use replay::{load_recording, save_recording, Recorder, Recording, ReplaySource};
pub use source::{CaptureError, CaptureSource, DepthMode, DeviceConfig, TemporalSmoothing};
pub use synthetic::SyntheticSource;
