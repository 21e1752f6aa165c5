pub mod auto_smooth;
pub mod bone;
pub mod bone_filter;
pub mod driver_pose;
pub mod kalman;
pub mod provider;
#[cfg(test)]
pub(crate) mod testing;
pub mod tracking_loop;

pub use auto_smooth::AutoSmoother;
pub use bone::{Bone, DeviceHandle, JointSource, TrackedBoneSlot};
pub use bone_filter::{Axis, BoneFilter};
pub use driver_pose::DriverPose;
pub use kalman::{AxisFilter, KalmanParams};
pub use provider::{BoneProvider, ConfigureOutcome, Lifecycle, StartOutcome, StopOutcome};
pub use tracking_loop::{CycleOutcome, LoopSettings, TrackingLoop};
