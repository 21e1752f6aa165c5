use crate::pose::{FilteredJointSample, JointSample};

use super::kalman::{AxisFilter, KalmanParams, ORIENTATION_DEFAULTS, POSITION_DEFAULTS};

/// BoneFilter が持つフィルタ軸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Axis {
    PositionX = 0,
    PositionY = 1,
    PositionZ = 2,
    OrientationX = 3,
    OrientationY = 4,
    OrientationZ = 5,
}

impl Axis {
    pub const COUNT: usize = 6;
    pub const POSITION: [Axis; 3] = [Axis::PositionX, Axis::PositionY, Axis::PositionZ];
}

/// 1関節分のカルマンフィルタ束（位置 x/y/z, 回転 x/y/z）
///
/// 回転 w は平滑化せず入力値をそのまま通す。成分ごとのフィルタなので出力クォータニオンは
/// 単位長にならない場合がある。`normalize` を有効にすると出力後に正規化する。
#[derive(Debug, Clone)]
pub struct BoneFilter {
    axes: [AxisFilter; Axis::COUNT],
    normalize: bool,
}

impl BoneFilter {
    pub fn new(position: KalmanParams, orientation: KalmanParams) -> Self {
        Self {
            axes: std::array::from_fn(|i| {
                if i < 3 {
                    AxisFilter::new(position)
                } else {
                    AxisFilter::new(orientation)
                }
            }),
            normalize: false,
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn filter(&mut self, raw: &JointSample) -> FilteredJointSample {
        let position = [
            self.axes[Axis::PositionX as usize].update(raw.position[0]),
            self.axes[Axis::PositionY as usize].update(raw.position[1]),
            self.axes[Axis::PositionZ as usize].update(raw.position[2]),
        ];
        let mut orientation = [
            raw.orientation[0],
            self.axes[Axis::OrientationX as usize].update(raw.orientation[1]),
            self.axes[Axis::OrientationY as usize].update(raw.orientation[2]),
            self.axes[Axis::OrientationZ as usize].update(raw.orientation[3]),
        ];

        if self.normalize {
            let len = orientation.iter().map(|v| v * v).sum::<f32>().sqrt();
            if len > 0.0 {
                for v in &mut orientation {
                    *v /= len;
                }
            }
        }

        JointSample::new(position, orientation)
    }

    // 以下の設定は位置3軸のみ。回転軸は固定のデフォルトを保つ

    pub fn set_measurement_error(&mut self, measurement_error: f32) {
        for axis in Axis::POSITION {
            self.axes[axis as usize].set_measurement_error(measurement_error);
        }
    }

    pub fn set_estimate_error(&mut self, estimate_error: f32) {
        for axis in Axis::POSITION {
            self.axes[axis as usize].set_estimate_error(estimate_error);
        }
    }

    pub fn set_process_noise(&mut self, process_noise: f32) {
        for axis in Axis::POSITION {
            self.axes[axis as usize].set_process_noise(process_noise);
        }
    }

    #[cfg(test)]
    fn axis(&self, axis: Axis) -> &AxisFilter {
        &self.axes[axis as usize]
    }
}

impl Default for BoneFilter {
    fn default() -> Self {
        Self::new(POSITION_DEFAULTS, ORIENTATION_DEFAULTS)
    }
}
