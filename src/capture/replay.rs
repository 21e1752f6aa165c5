use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::source::{CaptureError, CaptureSource, DeviceConfig, TemporalSmoothing};
use crate::pose::BodyFrame;

/// 記録済みボディフレーム列 (JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    pub frames: Vec<BodyFrame>,
}

fn default_frame_rate() -> u32 { 30 }

pub fn save_recording<P: AsRef<Path>>(path: P, recording: &Recording) -> Result<(), CaptureError> {
    let json = serde_json::to_string_pretty(recording)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_recording<P: AsRef<Path>>(path: P) -> Result<Recording, CaptureError> {
    let content = fs::read_to_string(path)?;
    let recording: Recording = serde_json::from_str(&content)?;
    Ok(recording)
}

/// 記録をフレームレートどおりに再生するキャプチャソース
pub struct ReplaySource {
    recording: Recording,
    looping: bool,
    cursor: usize,
    frame_interval: Duration,
    next_deadline: Option<Instant>,
    opened: bool,
    smoothing: TemporalSmoothing,
}

impl ReplaySource {
    pub fn new(recording: Recording, looping: bool) -> Self {
        let fps = recording.frame_rate.max(1) as f64;
        Self {
            recording,
            looping,
            cursor: 0,
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            next_deadline: None,
            opened: false,
            smoothing: TemporalSmoothing::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, looping: bool) -> Result<Self, CaptureError> {
        Ok(Self::new(load_recording(path)?, looping))
    }

    fn wait_for_next_frame(&mut self) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + self.frame_interval);
    }
}

impl CaptureSource for ReplaySource {
    type Frame = usize;

    fn open(&mut self, config: &DeviceConfig) -> Result<(), CaptureError> {
        if self.recording.frames.is_empty() {
            return Err(CaptureError::DeviceOpen("recording has no frames".into()));
        }
        log::info!(
            "Replay source opened: {} frames @ {} fps (depth mode {:?})",
            self.recording.frames.len(),
            self.recording.frame_rate,
            config.depth_mode
        );
        self.opened = true;
        self.cursor = 0;
        self.next_deadline = None;
        self.smoothing.reset();
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<usize, CaptureError> {
        if !self.opened {
            return Err(CaptureError::AcquireFailed("source not opened".into()));
        }
        self.wait_for_next_frame();

        if self.cursor >= self.recording.frames.len() {
            if !self.looping {
                return Err(CaptureError::AcquireFailed("end of recording".into()));
            }
            self.cursor = 0;
        }
        let index = self.cursor;
        self.cursor += 1;
        Ok(index)
    }

    fn extract_skeleton(&mut self, frame: &usize, _timeout: Duration) -> Result<BodyFrame, CaptureError> {
        let body = self
            .recording
            .frames
            .get(*frame)
            .cloned()
            .ok_or_else(|| CaptureError::Extraction(format!("frame {} out of range", frame)))?;
        Ok(self.smoothing.apply(body))
    }

    fn release_frame(&mut self, _frame: usize) {}

    fn set_temporal_smoothing(&mut self, factor: f32) {
        self.smoothing.set_factor(factor);
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// 別のソースを包み、抽出結果を記録する。`close` で JSON に書き出す
pub struct Recorder<S> {
    inner: S,
    path: PathBuf,
    frame_rate: u32,
    frames: Vec<BodyFrame>,
}

impl<S: CaptureSource> Recorder<S> {
    pub fn new<P: Into<PathBuf>>(inner: S, path: P, frame_rate: u32) -> Self {
        Self {
            inner,
            path: path.into(),
            frame_rate,
            frames: Vec::new(),
        }
    }

    fn flush(&mut self) -> Result<usize, CaptureError> {
        if self.frames.is_empty() {
            return Ok(0);
        }
        let recording = Recording {
            frame_rate: self.frame_rate,
            frames: std::mem::take(&mut self.frames),
        };
        save_recording(&self.path, &recording)?;
        Ok(recording.frames.len())
    }
}

impl<S: CaptureSource> CaptureSource for Recorder<S> {
    type Frame = S::Frame;

    fn open(&mut self, config: &DeviceConfig) -> Result<(), CaptureError> {
        self.frames.clear();
        self.inner.open(config)
    }

    fn acquire_frame(&mut self) -> Result<S::Frame, CaptureError> {
        self.inner.acquire_frame()
    }

    fn extract_skeleton(&mut self, frame: &S::Frame, timeout: Duration) -> Result<BodyFrame, CaptureError> {
        let body = self.inner.extract_skeleton(frame, timeout)?;
        self.frames.push(body.clone());
        Ok(body)
    }

    fn release_frame(&mut self, frame: S::Frame) {
        self.inner.release_frame(frame);
    }

    fn set_temporal_smoothing(&mut self, factor: f32) {
        self.inner.set_temporal_smoothing(factor);
    }

    fn close(&mut self) {
        self.inner.close();
        match self.flush() {
            Ok(0) => log::info!("Nothing recorded, {} not written", self.path.display()),
            Ok(n) => log::info!("Recorded {} frames to {}", n, self.path.display()),
            Err(e) => log::error!("Failed to save recording {}: {}", self.path.display(), e),
        }
    }
}
