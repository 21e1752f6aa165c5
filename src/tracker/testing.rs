//! Scripted capture source and recording sink for loop tests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::capture::{CaptureError, CaptureSource, DeviceConfig};
use crate::pose::BodyFrame;
use crate::sink::PoseSink;

use super::bone::{Bone, DeviceHandle};
use super::driver_pose::DriverPose;

/// Handles 10..18 in publish order.
pub fn bound_handles() -> [DeviceHandle; Bone::COUNT] {
    std::array::from_fn(|i| DeviceHandle(10 + i as u32))
}

#[derive(Debug, Clone)]
pub enum Step {
    AcquireFail,
    TrackTimeout,
    Body(BodyFrame),
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    pending: VecDeque<(u32, BodyFrame)>,
    next_frame: u32,
    acquired: usize,
    released: usize,
    smoothing: Vec<f32>,
    closed: bool,
    fail_open: bool,
}

/// Clones share one script, so a test can keep a handle after moving the source into a loop.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        let source = Self::default();
        source.state.lock().steps = steps.into();
        source
    }

    pub fn failing_open() -> Self {
        let source = Self::default();
        source.state.lock().fail_open = true;
        source
    }

    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    pub fn released(&self) -> usize {
        self.state.lock().released
    }

    pub fn smoothing_history(&self) -> Vec<f32> {
        self.state.lock().smoothing.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl CaptureSource for ScriptedSource {
    type Frame = u32;

    fn open(&mut self, _config: &DeviceConfig) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(CaptureError::DeviceOpen("no device".into()));
        }
        state.closed = false;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<u32, CaptureError> {
        let step = self.state.lock().steps.pop_front();
        let Some(step) = step else {
            // 台本切れ。スレッドテストで空回りしないように少し待つ
            thread::sleep(Duration::from_millis(1));
            return Err(CaptureError::AcquireFailed("script exhausted".into()));
        };

        let mut state = self.state.lock();
        let body = match step {
            Step::AcquireFail => return Err(CaptureError::AcquireFailed("scripted".into())),
            Step::TrackTimeout => None,
            Step::Body(body) => Some(body),
        };
        let id = state.next_frame;
        state.next_frame += 1;
        state.acquired += 1;
        if let Some(body) = body {
            state.pending.push_back((id, body));
        }
        Ok(id)
    }

    fn extract_skeleton(&mut self, frame: &u32, timeout: Duration) -> Result<BodyFrame, CaptureError> {
        let mut state = self.state.lock();
        match state.pending.front() {
            Some((id, _)) if id == frame => {}
            _ => return Err(CaptureError::Timeout(timeout)),
        }
        state
            .pending
            .pop_front()
            .map(|(_, body)| body)
            .ok_or(CaptureError::Timeout(timeout))
    }

    fn release_frame(&mut self, _frame: u32) {
        self.state.lock().released += 1;
    }

    fn set_temporal_smoothing(&mut self, factor: f32) {
        self.state.lock().smoothing.push(factor);
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

/// Records every publish; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<(DeviceHandle, DriverPose)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(DeviceHandle, DriverPose)> {
        self.published.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl PoseSink for RecordingSink {
    fn publish(&mut self, handle: DeviceHandle, pose: &DriverPose) {
        self.published.lock().push((handle, *pose));
    }
}
