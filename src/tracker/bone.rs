use serde::{Deserialize, Serialize};

use crate::pose::{JointId, JointSample, Skeleton};

use super::bone_filter::BoneFilter;
use super::driver_pose::DriverPose;

/// ホストランタイムが割り当てたデバイスハンドル（不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub u32);

/// 仮想トラッカーに対応する論理ボーン
///
/// 宣言順がそのまま送信順になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum Bone {
    Pelvis = 0,
    RightLeg = 1,
    LeftLeg = 2,
    Chest = 3,
    RightElbow = 4,
    LeftElbow = 5,
    RightKnee = 6,
    LeftKnee = 7,
}

/// ボーンの元になる関節
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointSource {
    Single(JointId),
    /// 位置は2関節の平均、回転は1つ目の関節
    Averaged(JointId, JointId),
}

impl JointSource {
    pub fn sample(&self, skeleton: &Skeleton) -> JointSample {
        match *self {
            JointSource::Single(id) => *skeleton.get(id),
            JointSource::Averaged(primary, secondary) => {
                skeleton.get(primary).averaged_with(skeleton.get(secondary))
            }
        }
    }
}

impl Bone {
    pub const COUNT: usize = 8;

    /// 送信順
    pub const ALL: [Bone; Bone::COUNT] = [
        Bone::Pelvis,
        Bone::RightLeg,
        Bone::LeftLeg,
        Bone::Chest,
        Bone::RightElbow,
        Bone::LeftElbow,
        Bone::RightKnee,
        Bone::LeftKnee,
    ];

    /// 常に送信するボーン
    pub const CORE: [Bone; 3] = [Bone::Pelvis, Bone::RightLeg, Bone::LeftLeg];

    /// 拡張トラッカーセットが有効なときだけ更新するボーン
    pub const EXTENDED: [Bone; 5] = [
        Bone::Chest,
        Bone::RightElbow,
        Bone::LeftElbow,
        Bone::RightKnee,
        Bone::LeftKnee,
    ];

    pub fn source(self) -> JointSource {
        match self {
            Bone::Pelvis => JointSource::Single(JointId::Pelvis),
            Bone::RightLeg => JointSource::Averaged(JointId::AnkleRight, JointId::FootRight),
            Bone::LeftLeg => JointSource::Averaged(JointId::AnkleLeft, JointId::FootLeft),
            Bone::Chest => JointSource::Single(JointId::SpineChest),
            Bone::RightElbow => JointSource::Single(JointId::ElbowRight),
            Bone::LeftElbow => JointSource::Single(JointId::ElbowLeft),
            Bone::RightKnee => JointSource::Single(JointId::KneeRight),
            Bone::LeftKnee => JointSource::Single(JointId::KneeLeft),
        }
    }

    pub fn is_extended(self) -> bool {
        !Self::CORE.contains(&self)
    }

    /// 自動スムージングの動き量に寄与するか（足首のみ）
    pub fn contributes_motion(self) -> bool {
        matches!(self, Bone::RightLeg | Bone::LeftLeg)
    }

    pub fn is_elbow(self) -> bool {
        matches!(self, Bone::RightElbow | Bone::LeftElbow)
    }

    pub fn name(self) -> &'static str {
        match self {
            Bone::Pelvis => "pelvis",
            Bone::RightLeg => "right_leg",
            Bone::LeftLeg => "left_leg",
            Bone::Chest => "chest",
            Bone::RightElbow => "right_elbow",
            Bone::LeftElbow => "left_elbow",
            Bone::RightKnee => "right_knee",
            Bone::LeftKnee => "left_knee",
        }
    }
}

/// ボーン・デバイスハンドル・直近の送信ポーズ・フィルタの組
#[derive(Debug, Clone)]
pub struct TrackedBoneSlot {
    pub bone: Bone,
    pub handle: DeviceHandle,
    pub pose: DriverPose,
    pub filter: BoneFilter,
    /// 速度計算に使える前フレーム位置があるか
    pub has_sample: bool,
}

impl TrackedBoneSlot {
    pub fn new(bone: Bone, handle: DeviceHandle, pose: DriverPose, filter: BoneFilter) -> Self {
        Self {
            bone,
            handle,
            pose,
            filter,
            has_sample: false,
        }
    }

    /// フィルタを差し替え、次のサンプルを初回として扱う
    pub fn restart(&mut self, filter: BoneFilter) {
        self.filter = filter;
        self.has_sample = false;
    }
}

/// センサー座標（mm）→ ドライバ座標（m）。軸は Z→X, X→Y, Y→Z に並べ替える
pub fn sensor_to_driver_position(position: &[f32; 3]) -> [f64; 3] {
    [
        position[2] as f64 / 1000.0,
        position[0] as f64 / 1000.0,
        position[1] as f64 / 1000.0,
    ]
}

/// 回転 (w, x, y, z) に同じ軸並べ替えを適用する。戻り値は (w, x, y, z)
pub fn sensor_to_driver_orientation(orientation: &[f32; 4]) -> [f64; 4] {
    [
        orientation[0] as f64,
        orientation[3] as f64,
        orientation[1] as f64,
        orientation[2] as f64,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_order() {
        for (i, bone) in Bone::ALL.iter().enumerate() {
            assert_eq!(*bone as usize, i);
        }
        assert_eq!(&Bone::ALL[..3], &Bone::CORE);
        assert_eq!(&Bone::ALL[3..], &Bone::EXTENDED);
    }

    #[test]
    fn test_joint_table() {
        assert_eq!(Bone::Pelvis.source(), JointSource::Single(JointId::Pelvis));
        assert_eq!(
            Bone::RightLeg.source(),
            JointSource::Averaged(JointId::AnkleRight, JointId::FootRight)
        );
        assert_eq!(
            Bone::LeftLeg.source(),
            JointSource::Averaged(JointId::AnkleLeft, JointId::FootLeft)
        );
        assert_eq!(Bone::Chest.source(), JointSource::Single(JointId::SpineChest));
        assert_eq!(Bone::RightElbow.source(), JointSource::Single(JointId::ElbowRight));
        assert_eq!(Bone::LeftElbow.source(), JointSource::Single(JointId::ElbowLeft));
        assert_eq!(Bone::RightKnee.source(), JointSource::Single(JointId::KneeRight));
        assert_eq!(Bone::LeftKnee.source(), JointSource::Single(JointId::KneeLeft));
    }

    #[test]
    fn test_extended_flags() {
        assert!(!Bone::Pelvis.is_extended());
        assert!(!Bone::LeftLeg.is_extended());
        assert!(Bone::Chest.is_extended());
        assert!(Bone::LeftKnee.is_extended());
        assert!(Bone::RightLeg.contributes_motion());
        assert!(!Bone::RightKnee.contributes_motion());
    }

    #[test]
    fn test_averaged_source() {
        let mut skeleton = Skeleton::default();
        skeleton.set(JointId::AnkleLeft, JointSample::new([0.0, 100.0, 1000.0], [0.9, 0.1, 0.2, 0.3]));
        skeleton.set(JointId::FootLeft, JointSample::new([20.0, 50.0, 1100.0], [1.0, 0.0, 0.0, 0.0]));
        let sample = Bone::LeftLeg.source().sample(&skeleton);
        assert_eq!(sample.position, [10.0, 75.0, 1050.0]);
        assert_eq!(sample.orientation, [0.9, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_axis_permutation() {
        let p = sensor_to_driver_position(&[1000.0, 2000.0, 3000.0]);
        assert_eq!(p, [3.0, 1.0, 2.0]);
        let q = sensor_to_driver_orientation(&[0.5, 0.1, 0.2, 0.3]);
        assert_eq!(q[0], 0.5);
        assert!((q[1] - 0.3).abs() < 1e-7);
        assert!((q[2] - 0.1).abs() < 1e-7);
        assert!((q[3] - 0.2).abs() < 1e-7);
    }
}
