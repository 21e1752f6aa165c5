use serde::{Deserialize, Serialize};

/// ボディトラッキングSDKの 32 関節インデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum JointId {
    Pelvis = 0,
    SpineNavel = 1,
    SpineChest = 2,
    Neck = 3,
    ClavicleLeft = 4,
    ShoulderLeft = 5,
    ElbowLeft = 6,
    WristLeft = 7,
    HandLeft = 8,
    HandTipLeft = 9,
    ThumbLeft = 10,
    ClavicleRight = 11,
    ShoulderRight = 12,
    ElbowRight = 13,
    WristRight = 14,
    HandRight = 15,
    HandTipRight = 16,
    ThumbRight = 17,
    HipLeft = 18,
    KneeLeft = 19,
    AnkleLeft = 20,
    FootLeft = 21,
    HipRight = 22,
    KneeRight = 23,
    AnkleRight = 24,
    FootRight = 25,
    Head = 26,
    Nose = 27,
    EyeLeft = 28,
    EarLeft = 29,
    EyeRight = 30,
    EarRight = 31,
}

impl JointId {
    pub const COUNT: usize = 32;

    pub const ALL: [JointId; JointId::COUNT] = [
        Self::Pelvis,
        Self::SpineNavel,
        Self::SpineChest,
        Self::Neck,
        Self::ClavicleLeft,
        Self::ShoulderLeft,
        Self::ElbowLeft,
        Self::WristLeft,
        Self::HandLeft,
        Self::HandTipLeft,
        Self::ThumbLeft,
        Self::ClavicleRight,
        Self::ShoulderRight,
        Self::ElbowRight,
        Self::WristRight,
        Self::HandRight,
        Self::HandTipRight,
        Self::ThumbRight,
        Self::HipLeft,
        Self::KneeLeft,
        Self::AnkleLeft,
        Self::FootLeft,
        Self::HipRight,
        Self::KneeRight,
        Self::AnkleRight,
        Self::FootRight,
        Self::Head,
        Self::Nose,
        Self::EyeLeft,
        Self::EarLeft,
        Self::EyeRight,
        Self::EarRight,
    ];
}

/// 単一関節の検出結果（センサー座標系）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSample {
    /// 位置 (x, y, z) ミリメートル
    pub position: [f32; 3],
    /// 回転 (クォータニオン: w, x, y, z)
    pub orientation: [f32; 4],
}

/// BoneFilter の出力。形は JointSample と同じだが、値は過去の入力すべてに依存する推定値。
pub type FilteredJointSample = JointSample;

impl JointSample {
    pub fn new(position: [f32; 3], orientation: [f32; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// 2関節の位置を平均する。回転は self のものを使う。
    pub fn averaged_with(&self, other: &JointSample) -> JointSample {
        JointSample {
            position: [
                (self.position[0] + other.position[0]) / 2.0,
                (self.position[1] + other.position[1]) / 2.0,
                (self.position[2] + other.position[2]) / 2.0,
            ],
            orientation: self.orientation,
        }
    }
}

impl Default for JointSample {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// 1人分・1フレーム分の全関節
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub joints: [JointSample; JointId::COUNT],
}

impl Skeleton {
    /// インデックスで関節を取得
    pub fn get(&self, id: JointId) -> &JointSample {
        &self.joints[id as usize]
    }

    pub fn set(&mut self, id: JointId, sample: JointSample) {
        self.joints[id as usize] = sample;
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self {
            joints: [JointSample::default(); JointId::COUNT],
        }
    }
}

/// スケルトン抽出の結果
///
/// `bodies` の各要素は検出された1人分。`None` はその人物のスケルトン取得に失敗したことを表す。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyFrame {
    #[serde(default)]
    pub timestamp_us: u64,
    pub bodies: Vec<Option<Skeleton>>,
}

impl BodyFrame {
    pub fn empty(timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            bodies: Vec::new(),
        }
    }

    pub fn single(timestamp_us: u64, skeleton: Skeleton) -> Self {
        Self {
            timestamp_us,
            bodies: vec![Some(skeleton)],
        }
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// 最初に検出された人物。複数人の識別は行わない。
    pub fn first_body(&self) -> Option<&Option<Skeleton>> {
        self.bodies.first()
    }
}
