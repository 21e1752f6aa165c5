use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::capture::{DepthMode, DeviceConfig};
use crate::tracker::kalman::{KalmanParams, ORIENTATION_DEFAULTS, POSITION_DEFAULTS};
use crate::tracker::tracking_loop::{ELBOW_VELOCITY_SCALE, VELOCITY_TIMESTEP};
use crate::tracker::{Bone, DeviceHandle, DriverPose, LoopSettings};
use crate::vmt::VMT_DEFAULT_ADDR;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub vmt: VmtConfig,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub bones: BonesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VmtConfig {
    #[serde(default = "default_vmt_addr")]
    pub addr: String,
    /// 1=トラッカー, 7=トラッカー(VIVE互換モード)
    #[serde(default = "default_vmt_enable")]
    pub enable: i32,
}

fn default_vmt_addr() -> String { VMT_DEFAULT_ADDR.to_string() }
fn default_vmt_enable() -> i32 { 1 }

impl Default for VmtConfig {
    fn default() -> Self {
        Self {
            addr: default_vmt_addr(),
            enable: default_vmt_enable(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSection {
    #[serde(default)]
    pub depth_mode: DepthMode,
    /// 起動時のテンポラルスムージング
    #[serde(default = "default_initial_smoothing")]
    pub initial_smoothing: f32,
    /// スケルトン抽出タイムアウト（ミリ秒）
    #[serde(default = "default_track_timeout_ms")]
    pub track_timeout_ms: u64,
    /// バインド待ちのポーリング間隔（ミリ秒）
    #[serde(default = "default_bind_poll_ms")]
    pub bind_poll_ms: u64,
}

fn default_initial_smoothing() -> f32 { 0.025 }
fn default_track_timeout_ms() -> u64 { 16 }
fn default_bind_poll_ms() -> u64 { 33 }

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            depth_mode: DepthMode::default(),
            initial_smoothing: default_initial_smoothing(),
            track_timeout_ms: default_track_timeout_ms(),
            bind_poll_ms: default_bind_poll_ms(),
        }
    }
}

impl DeviceSection {
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            depth_mode: self.depth_mode,
            initial_smoothing: self.initial_smoothing,
            track_timeout: Duration::from_millis(self.track_timeout_ms),
        }
    }

    pub fn bind_poll(&self) -> Duration {
        Duration::from_millis(self.bind_poll_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// 速度計算の固定タイムステップ（秒）
    #[serde(default = "default_velocity_timestep")]
    pub velocity_timestep: f64,
    #[serde(default = "default_elbow_velocity_scale")]
    pub elbow_velocity_scale: f64,
    /// ランタイムに渡す予測時間（秒）
    #[serde(default = "default_pose_time_offset")]
    pub pose_time_offset: f64,
    /// ボーンごとのカルマンフィルタ
    #[serde(default = "default_true")]
    pub kalman: bool,
    #[serde(default)]
    pub normalize_orientation: bool,
}

fn default_velocity_timestep() -> f64 { VELOCITY_TIMESTEP }
fn default_elbow_velocity_scale() -> f64 { ELBOW_VELOCITY_SCALE }
fn default_pose_time_offset() -> f64 { DriverPose::DEFAULT_TIME_OFFSET }
fn default_true() -> bool { true }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            velocity_timestep: default_velocity_timestep(),
            elbow_velocity_scale: default_elbow_velocity_scale(),
            pose_time_offset: default_pose_time_offset(),
            kalman: default_true(),
            normalize_orientation: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub position: KalmanSection,
    #[serde(default)]
    pub orientation: KalmanSection,
}

impl FilterConfig {
    pub fn position_params(&self) -> KalmanParams {
        self.position.resolve(POSITION_DEFAULTS)
    }

    pub fn orientation_params(&self) -> KalmanParams {
        self.orientation.resolve(ORIENTATION_DEFAULTS)
    }
}

/// カルマンフィルタのノイズ値。省略した項目は軸ごとの既定値になる
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct KalmanSection {
    #[serde(default)]
    pub measurement_error: Option<f32>,
    #[serde(default)]
    pub estimate_error: Option<f32>,
    #[serde(default)]
    pub process_noise: Option<f32>,
}

impl KalmanSection {
    pub fn resolve(&self, defaults: KalmanParams) -> KalmanParams {
        KalmanParams::new(
            self.measurement_error.unwrap_or(defaults.measurement_error),
            self.estimate_error.unwrap_or(defaults.estimate_error),
            self.process_noise.unwrap_or(defaults.process_noise),
        )
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Replay,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// 記録ファイル (JSON)
    #[serde(default = "default_replay_path")]
    pub replay_path: String,
    #[serde(default = "default_true")]
    pub looping: bool,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// 設定すると抽出したボディフレームを終了時にこのファイルへ記録する
    #[serde(default)]
    pub record_path: Option<String>,
}

fn default_replay_path() -> String { "recording.json".to_string() }
fn default_frame_rate() -> u32 { 30 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            replay_path: default_replay_path(),
            looping: default_true(),
            frame_rate: default_frame_rate(),
            record_path: None,
        }
    }
}

/// ボーンごとの VMT トラッカー番号
#[derive(Debug, Deserialize, Clone)]
pub struct BonesConfig {
    #[serde(default = "default_pelvis")]
    pub pelvis: u32,
    #[serde(default = "default_right_leg")]
    pub right_leg: u32,
    #[serde(default = "default_left_leg")]
    pub left_leg: u32,
    #[serde(default = "default_chest")]
    pub chest: u32,
    #[serde(default = "default_right_elbow")]
    pub right_elbow: u32,
    #[serde(default = "default_left_elbow")]
    pub left_elbow: u32,
    #[serde(default = "default_right_knee")]
    pub right_knee: u32,
    #[serde(default = "default_left_knee")]
    pub left_knee: u32,
}

fn default_pelvis() -> u32 { 0 }
fn default_right_leg() -> u32 { 1 }
fn default_left_leg() -> u32 { 2 }
fn default_chest() -> u32 { 3 }
fn default_right_elbow() -> u32 { 4 }
fn default_left_elbow() -> u32 { 5 }
fn default_right_knee() -> u32 { 6 }
fn default_left_knee() -> u32 { 7 }

impl Default for BonesConfig {
    fn default() -> Self {
        Self {
            pelvis: default_pelvis(),
            right_leg: default_right_leg(),
            left_leg: default_left_leg(),
            chest: default_chest(),
            right_elbow: default_right_elbow(),
            left_elbow: default_left_elbow(),
            right_knee: default_right_knee(),
            left_knee: default_left_knee(),
        }
    }
}

impl BonesConfig {
    pub fn handle(&self, bone: Bone) -> DeviceHandle {
        let index = match bone {
            Bone::Pelvis => self.pelvis,
            Bone::RightLeg => self.right_leg,
            Bone::LeftLeg => self.left_leg,
            Bone::Chest => self.chest,
            Bone::RightElbow => self.right_elbow,
            Bone::LeftElbow => self.left_elbow,
            Bone::RightKnee => self.right_knee,
            Bone::LeftKnee => self.left_knee,
        };
        DeviceHandle(index)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければ既定値で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default config ({}: {})", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        let device = self.device.device_config();
        LoopSettings {
            track_timeout: device.track_timeout,
            initial_smoothing: device.initial_smoothing,
            velocity_timestep: self.tracking.velocity_timestep,
            elbow_velocity_scale: self.tracking.elbow_velocity_scale,
            pose_time_offset: self.tracking.pose_time_offset,
            kalman: self.tracking.kalman,
            position_filter: self.filter.position_params(),
            orientation_filter: self.filter.orientation_params(),
            normalize_orientation: self.tracking.normalize_orientation,
        }
    }
}
