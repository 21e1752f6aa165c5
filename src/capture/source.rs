use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::pose::{BodyFrame, Skeleton};

/// キャプチャ・スケルトン抽出のエラー
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device open failed: {0}")]
    DeviceOpen(String),

    #[error("Frame acquisition failed: {0}")]
    AcquireFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Skeleton extraction failed: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recording format error: {0}")]
    Format(#[from] serde_json::Error),
}

impl CaptureError {
    /// フレーム単位で読み飛ばしてよいエラーか
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptureError::AcquireFailed(_) | CaptureError::Timeout(_) | CaptureError::Extraction(_)
        )
    }
}

/// 深度センサーの動作モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DepthMode {
    Off,
    NfovBinned,
    #[default]
    NfovUnbinned,
    WfovBinned,
    WfovUnbinned,
    PassiveIr,
}

/// デバイスの起動設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    pub depth_mode: DepthMode,
    /// 起動時に抽出ステージへ設定するテンポラルスムージング (0.0〜1.0)
    pub initial_smoothing: f32,
    /// スケルトン抽出の投入・取得それぞれのタイムアウト
    pub track_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            depth_mode: DepthMode::NfovUnbinned,
            initial_smoothing: 0.025,
            track_timeout: Duration::from_millis(16),
        }
    }
}

/// 深度デバイスとスケルトン抽出パイプライン
///
/// `acquire_frame` で得たフレームは、どの経路でも必ず `release_frame` に返すこと。
pub trait CaptureSource: Send {
    type Frame: Send;

    /// デバイスを開いてカメラを開始する。失敗はループ起動の失敗として扱う
    fn open(&mut self, config: &DeviceConfig) -> Result<(), CaptureError>;

    /// 次のフレームを待つ（無期限ブロック）
    fn acquire_frame(&mut self) -> Result<Self::Frame, CaptureError>;

    /// フレームを抽出ステージへ投入し、結果を受け取る。投入・取得それぞれ `timeout` まで待つ
    fn extract_skeleton(
        &mut self,
        frame: &Self::Frame,
        timeout: Duration,
    ) -> Result<BodyFrame, CaptureError>;

    fn release_frame(&mut self, frame: Self::Frame);

    /// 抽出ステージのテンポラルスムージング (0.0〜1.0)
    fn set_temporal_smoothing(&mut self, factor: f32);

    /// 抽出コンテキストを破棄してカメラを止める
    fn close(&mut self);
}

/// 抽出ステージのテンポラルスムージング
///
/// 先頭の人物の関節位置を前フレームの出力へ `factor` の割合で寄せる。回転はそのフレームの値のまま。
#[derive(Debug, Clone, Default)]
pub struct TemporalSmoothing {
    factor: f32,
    previous: Option<Skeleton>,
}

impl TemporalSmoothing {
    pub fn set_factor(&mut self, factor: f32) {
        self.factor = factor.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn apply(&mut self, mut frame: BodyFrame) -> BodyFrame {
        if let Some(Some(skeleton)) = frame.bodies.first_mut() {
            if let Some(previous) = &self.previous {
                let keep = self.factor;
                for (joint, prev) in skeleton.joints.iter_mut().zip(previous.joints.iter()) {
                    for (p, q) in joint.position.iter_mut().zip(prev.position) {
                        *p = q * keep + *p * (1.0 - keep);
                    }
                }
            }
            self.previous = Some(skeleton.clone());
        }
        frame
    }
}
