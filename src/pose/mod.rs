pub mod joint;

pub use joint::{BodyFrame, FilteredJointSample, JointId, JointSample, Skeleton};
