use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// --- データ構造 ---

/// 外部ツールが書き込むキャリブレーション共有レコード
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// 並進オフセット (x, y, z) メートル
    pub offset: [f32; 3],
    /// 回転オフセット (w, x, y, z)
    pub rotation_offset: [f32; 4],
    /// 書き手が再キャリブレーションを要求したら true。読み手が消費後に1回だけクリアする
    pub dirty: bool,
    pub auto_smooth: bool,
    /// 固定スムージング値、または自動スムージング時のリセット閾値
    pub smoothing: f32,
    /// 胸・肘・膝トラッカーを有効にする
    pub extended_trackers: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0, 0.0],
            rotation_offset: [1.0, 0.0, 0.0, 0.0],
            dirty: false,
            auto_smooth: false,
            smoothing: 0.0,
            extended_trackers: false,
        }
    }
}

/// 1フレーム分に固定したキャリブレーション値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSnapshot {
    pub offset: [f32; 3],
    /// (w, x, y, z)
    pub rotation_offset: [f32; 4],
    pub auto_smooth: bool,
    pub smoothing: f32,
    pub extended_trackers: bool,
}

impl From<&CalibrationState> for CalibrationSnapshot {
    fn from(state: &CalibrationState) -> Self {
        Self {
            offset: state.offset,
            rotation_offset: state.rotation_offset,
            auto_smooth: state.auto_smooth,
            smoothing: state.smoothing,
            extended_trackers: state.extended_trackers,
        }
    }
}

/// トラッキングループが依存するキャリブレーションの読み手側インターフェース
///
/// 実体の所有権は持たない。`take` / `take_if_dirty` は値の読み出しと dirty のクリアを
/// 書き手に対して不可分に行うこと。
pub trait CalibrationSource: Send + Sync {
    /// 現在値を読む。dirty は変更しない
    fn read(&self) -> CalibrationSnapshot;

    /// dirty に関係なく読み、dirty をクリアする
    fn take(&self) -> CalibrationSnapshot;

    /// dirty なら読んでクリアする
    fn take_if_dirty(&self) -> Option<CalibrationSnapshot>;

    fn clear_dirty(&self);

    /// 自動スムージングを書き手側の設定ごと無効化する
    fn disable_auto_smooth(&self);

    /// オフセットと回転を初期値に戻し、dirty をクリアする
    fn reset(&self);
}

// --- プロセス内共有実装 ---

/// `Arc<Mutex<_>>` で共有するキャリブレーション領域。clone したハンドルが書き手になる
#[derive(Debug, Clone, Default)]
pub struct SharedCalibration {
    state: Arc<Mutex<CalibrationState>>,
}

impl SharedCalibration {
    pub fn new(initial: CalibrationState) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
        }
    }

    /// 書き手用: 値を書き換え、dirty を立てる
    pub fn write<F: FnOnce(&mut CalibrationState)>(&self, f: F) {
        let mut state = self.state.lock();
        f(&mut state);
        state.dirty = true;
    }

    pub fn set_offset(&self, offset: [f32; 3]) {
        self.write(|s| s.offset = offset);
    }

    pub fn set_rotation_offset(&self, rotation_offset: [f32; 4]) {
        self.write(|s| s.rotation_offset = rotation_offset);
    }

    pub fn set_smoothing(&self, smoothing: f32) {
        self.write(|s| s.smoothing = smoothing);
    }

    pub fn set_auto_smooth(&self, enabled: bool) {
        self.write(|s| s.auto_smooth = enabled);
    }

    pub fn set_extended_trackers(&self, enabled: bool) {
        self.write(|s| s.extended_trackers = enabled);
    }

    /// レコード全体のコピー
    pub fn state(&self) -> CalibrationState {
        *self.state.lock()
    }
}

impl CalibrationSource for SharedCalibration {
    fn read(&self) -> CalibrationSnapshot {
        CalibrationSnapshot::from(&*self.state.lock())
    }

    fn take(&self) -> CalibrationSnapshot {
        let mut state = self.state.lock();
        state.dirty = false;
        CalibrationSnapshot::from(&*state)
    }

    fn take_if_dirty(&self) -> Option<CalibrationSnapshot> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(CalibrationSnapshot::from(&*state))
    }

    fn clear_dirty(&self) {
        self.state.lock().dirty = false;
    }

    fn disable_auto_smooth(&self) {
        self.state.lock().auto_smooth = false;
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        let defaults = CalibrationState::default();
        state.offset = defaults.offset;
        state.rotation_offset = defaults.rotation_offset;
        state.dirty = false;
    }
}
