use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::calibration::CalibrationSource;
use crate::capture::{CaptureSource, DeviceConfig};
use crate::sink::PoseSink;

use super::bone::{Bone, DeviceHandle};
use super::tracking_loop::{CycleOutcome, LoopSettings, TrackingLoop};

/// バインド待ちのポーリング間隔（既定値）
pub const BIND_POLL_INTERVAL: Duration = Duration::from_millis(33);

/// プロバイダのライフサイクル。Stopped からは戻らない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    AwaitingBindings,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyOnline,
    /// 一度停止したプロバイダは再起動できない
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    Applied,
    AlreadyOnline,
    Terminated,
}

#[derive(Debug, Default)]
struct Bindings {
    handles: [Option<DeviceHandle>; Bone::COUNT],
    /// ワーカーがハンドルを取り込んだ後は変更不可
    locked: bool,
}

impl Bindings {
    fn complete(&self) -> Option<[DeviceHandle; Bone::COUNT]> {
        let mut out = [DeviceHandle(0); Bone::COUNT];
        for (slot, handle) in out.iter_mut().zip(self.handles.iter()) {
            *slot = (*handle)?;
        }
        Some(out)
    }
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    bindings: Mutex<Bindings>,
    bound: Condvar,
}

impl Shared {
    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self.lifecycle.lock() = lifecycle;
    }
}

/// ワーカー終了時の報告
#[derive(Debug, Clone, Copy)]
struct WorkerExit {
    went_online: bool,
}

/// 深度カメラのスケルトンを8個の仮想トラッカーとして供給する
///
/// `start` でデバイスを開いてワーカースレッドを起動し、8ボーン全てのバインドを
/// 待ってから送信を始める。`stop` はワーカーの終了まで待つ。
pub struct BoneProvider<S, K>
where
    S: CaptureSource + 'static,
    K: PoseSink + 'static,
{
    calibration: Arc<dyn CalibrationSource>,
    device: DeviceConfig,
    settings: LoopSettings,
    bind_poll: Duration,
    shared: Arc<Shared>,
    parts: Option<(S, K)>,
    worker: Option<JoinHandle<WorkerExit>>,
}

impl<S, K> BoneProvider<S, K>
where
    S: CaptureSource + 'static,
    K: PoseSink + 'static,
{
    /// 共有キャリブレーション領域はここで初期値に戻す
    pub fn new(source: S, sink: K, calibration: Arc<dyn CalibrationSource>, settings: LoopSettings) -> Self {
        calibration.reset();
        Self {
            calibration,
            device: DeviceConfig::default(),
            settings,
            bind_poll: BIND_POLL_INTERVAL,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::Idle),
                bindings: Mutex::new(Bindings::default()),
                bound: Condvar::new(),
            }),
            parts: Some((source, sink)),
            worker: None,
        }
    }

    pub fn with_bind_poll(mut self, interval: Duration) -> Self {
        self.bind_poll = interval;
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock()
    }

    pub fn is_online(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    /// 起動前のみ受け付ける
    pub fn configure(&mut self, device: DeviceConfig) -> ConfigureOutcome {
        match self.lifecycle() {
            Lifecycle::Idle => {
                log::info!(
                    "Device configured: depth={:?} smoothing={} timeout={:?}",
                    device.depth_mode,
                    device.initial_smoothing,
                    device.track_timeout
                );
                self.device = device;
                ConfigureOutcome::Applied
            }
            Lifecycle::AwaitingBindings | Lifecycle::Running => {
                log::warn!("Device is already online, configuration ignored");
                ConfigureOutcome::AlreadyOnline
            }
            Lifecycle::Stopped => ConfigureOutcome::Terminated,
        }
    }

    /// ボーンにデバイスハンドルを割り当てる。同じボーンへの再バインドは後勝ち
    ///
    /// 送信開始後は無視して false を返す。
    pub fn bind(&self, bone: Bone, handle: DeviceHandle) -> bool {
        let mut bindings = self.shared.bindings.lock();
        if bindings.locked {
            log::warn!("Bind for {} ignored: tracking already running", bone.name());
            return false;
        }
        if let Some(previous) = bindings.handles[bone as usize].replace(handle) {
            if previous != handle {
                log::debug!("{} rebound {:?} -> {:?}", bone.name(), previous, handle);
            }
        }
        drop(bindings);
        self.shared.bound.notify_all();
        true
    }

    pub fn start(&mut self) -> Result<StartOutcome> {
        match self.lifecycle() {
            Lifecycle::AwaitingBindings | Lifecycle::Running => {
                log::info!("Device is already online");
                return Ok(StartOutcome::AlreadyOnline);
            }
            Lifecycle::Stopped => return Ok(StartOutcome::Terminated),
            Lifecycle::Idle => {}
        }
        let Some((mut source, sink)) = self.parts.take() else {
            return Ok(StartOutcome::Terminated);
        };

        if let Err(e) = source.open(&self.device) {
            self.parts = Some((source, sink));
            return Err(anyhow::Error::new(e).context("Failed to open capture device"));
        }

        let mut settings = self.settings;
        settings.track_timeout = self.device.track_timeout;
        settings.initial_smoothing = self.device.initial_smoothing;

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_lifecycle(Lifecycle::AwaitingBindings);

        let shared = Arc::clone(&self.shared);
        let calibration = Arc::clone(&self.calibration);
        let bind_poll = self.bind_poll;
        let spawned = thread::Builder::new()
            .name("bone-tracking".into())
            .spawn(move || run_worker(shared, source, sink, calibration, settings, bind_poll));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("Tracking thread started, waiting for {} bindings", Bone::COUNT);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_lifecycle(Lifecycle::Stopped);
                Err(e).context("Failed to spawn tracking thread")
            }
        }
    }

    /// ワーカーを止めて合流する。送信中だった場合のみ全ボーンの切断ポーズが送られる
    pub fn stop(&mut self) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            log::info!("Device is already offline");
            return StopOutcome::AlreadyOffline;
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.bound.notify_all();

        let exit = match worker.join() {
            Ok(exit) => exit,
            Err(_) => {
                log::error!("Tracking thread panicked");
                WorkerExit { went_online: false }
            }
        };
        self.shared.set_lifecycle(Lifecycle::Stopped);

        if exit.went_online {
            log::info!("Device is now offline");
            StopOutcome::Stopped
        } else {
            log::info!("Device is already offline");
            StopOutcome::AlreadyOffline
        }
    }
}

impl<S, K> Drop for BoneProvider<S, K>
where
    S: CaptureSource + 'static,
    K: PoseSink + 'static,
{
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

/// 全ボーンがバインドされるまで待つ。キャンセルされたら None
fn wait_for_bindings(shared: &Shared, poll: Duration) -> Option<[DeviceHandle; Bone::COUNT]> {
    let mut bindings = shared.bindings.lock();
    loop {
        if !shared.running.load(Ordering::Acquire) {
            return None;
        }
        if let Some(handles) = bindings.complete() {
            bindings.locked = true;
            return Some(handles);
        }
        shared.bound.wait_for(&mut bindings, poll);
    }
}

fn run_worker<S, K>(
    shared: Arc<Shared>,
    mut source: S,
    sink: K,
    calibration: Arc<dyn CalibrationSource>,
    settings: LoopSettings,
    bind_poll: Duration,
) -> WorkerExit
where
    S: CaptureSource,
    K: PoseSink,
{
    let Some(handles) = wait_for_bindings(&shared, bind_poll) else {
        source.close();
        return WorkerExit { went_online: false };
    };

    let mut tracking = TrackingLoop::new(source, sink, calibration, handles, settings);
    shared.set_lifecycle(Lifecycle::Running);
    tracking.go_online();

    let mut stats = CycleStats::default();
    let mut last_report = Instant::now();
    while shared.running.load(Ordering::Acquire) {
        let outcome = tracking.run_cycle();
        stats.record(outcome);

        if last_report.elapsed() >= Duration::from_secs(5) {
            log::debug!("{}", stats);
            stats = CycleStats::default();
            last_report = Instant::now();
        }
    }

    tracking.shutdown();
    WorkerExit { went_online: true }
}

#[derive(Debug, Default)]
struct CycleStats {
    published: u64,
    empty: u64,
    skipped: u64,
    invalid: u64,
}

impl CycleStats {
    fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Published(_) => self.published += 1,
            CycleOutcome::NoBody => self.empty += 1,
            CycleOutcome::AcquireFailed | CycleOutcome::TrackFailed => self.skipped += 1,
            CycleOutcome::SkeletonFailed => self.invalid += 1,
        }
    }
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames: published={} empty={} skipped={} invalid={}",
            self.published, self.empty, self.skipped, self.invalid
        )
    }
}
