use nalgebra::Quaternion;
use std::f64::consts::FRAC_PI_4;

/// ランタイムへ送る1トラッカー分のポーズ
///
/// 位置・速度はドライバ空間（メートル）。`world_from_driver_*` がキャリブレーションで
/// 上書きされ、ワールド空間への変換を担う。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPose {
    pub position: [f64; 3],
    pub rotation: Quaternion<f64>,
    pub velocity: [f64; 3],
    pub acceleration: [f64; 3],
    pub angular_velocity: [f64; 3],
    pub angular_acceleration: [f64; 3],
    pub world_from_driver_rotation: Quaternion<f64>,
    pub world_from_driver_translation: [f64; 3],
    pub driver_from_head_rotation: Quaternion<f64>,
    pub driver_from_head_translation: [f64; 3],
    /// 秒
    pub pose_time_offset: f64,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
    pub will_drift_in_yaw: bool,
    pub should_apply_head_model: bool,
}

impl DriverPose {
    pub const DEFAULT_TIME_OFFSET: f64 = 0.11;

    /// バインド直後の初期ポーズ。最初のキャリブレーションまでは X 軸まわり 90° でワールドへ変換する
    pub fn baseline(pose_time_offset: f64) -> Self {
        Self {
            position: [0.0; 3],
            rotation: Quaternion::identity(),
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
            angular_velocity: [0.0; 3],
            angular_acceleration: [0.0; 3],
            world_from_driver_rotation: Quaternion::new(FRAC_PI_4.cos(), FRAC_PI_4.sin(), 0.0, 0.0),
            world_from_driver_translation: [0.0; 3],
            driver_from_head_rotation: Quaternion::identity(),
            driver_from_head_translation: [0.0; 3],
            pose_time_offset,
            pose_is_valid: false,
            device_is_connected: false,
            will_drift_in_yaw: false,
            should_apply_head_model: false,
        }
    }

    /// 切断かつ無効として印を付ける（停止時）
    pub fn mark_offline(&mut self) {
        self.device_is_connected = false;
        self.pose_is_valid = false;
    }
}

impl Default for DriverPose {
    fn default() -> Self {
        Self::baseline(Self::DEFAULT_TIME_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_values() {
        let pose = DriverPose::default();
        assert_eq!(pose.pose_time_offset, 0.11);
        assert!(!pose.pose_is_valid);
        assert!(!pose.device_is_connected);
        assert_eq!(pose.driver_from_head_rotation, Quaternion::identity());
        assert_eq!(pose.velocity, [0.0; 3]);

        let r = pose.world_from_driver_rotation;
        assert!((r.w - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert!((r.i - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert_eq!(r.j, 0.0);
        assert_eq!(r.k, 0.0);
    }

    #[test]
    fn test_mark_offline() {
        let mut pose = DriverPose::default();
        pose.pose_is_valid = true;
        pose.device_is_connected = true;
        pose.mark_offline();
        assert!(!pose.pose_is_valid);
        assert!(!pose.device_is_connected);
    }
}
