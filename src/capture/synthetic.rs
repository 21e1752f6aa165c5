//! Procedurally animated skeleton source.
//!
//! Stands one body two metres in front of the sensor and sways it side to side while
//! alternately lifting the feet. Useful for driving the tracker without a depth device.

use std::thread;
use std::time::{Duration, Instant};

use super::source::{CaptureError, CaptureSource, DeviceConfig, TemporalSmoothing};
use crate::pose::{BodyFrame, JointId, JointSample, Skeleton};

const BODY_DEPTH_MM: f32 = 2000.0;
const SWAY_AMPLITUDE_MM: f32 = 60.0;
const STEP_HEIGHT_MM: f32 = 80.0;
const CYCLE_SECS: f32 = 2.0;

/// Sensor-frame rest pose (mm, y down).
const REST_POSE: [(JointId, [f32; 3]); 11] = [
    (JointId::Pelvis, [0.0, 0.0, 0.0]),
    (JointId::SpineNavel, [0.0, -150.0, 0.0]),
    (JointId::SpineChest, [0.0, -300.0, 0.0]),
    (JointId::Neck, [0.0, -480.0, 0.0]),
    (JointId::Head, [0.0, -600.0, 0.0]),
    (JointId::ElbowLeft, [-250.0, -200.0, 20.0]),
    (JointId::ElbowRight, [250.0, -200.0, 20.0]),
    (JointId::KneeLeft, [-100.0, 450.0, -30.0]),
    (JointId::KneeRight, [100.0, 450.0, -30.0]),
    (JointId::AnkleLeft, [-110.0, 850.0, 0.0]),
    (JointId::AnkleRight, [110.0, 850.0, 0.0]),
];

const FOOT_OFFSET: [f32; 3] = [0.0, 40.0, -110.0];

pub struct SyntheticSource {
    frame_interval: Duration,
    next_deadline: Option<Instant>,
    frame_index: u64,
    opened: bool,
    smoothing: TemporalSmoothing,
}

impl SyntheticSource {
    pub fn new(frame_rate: u32) -> Self {
        let fps = frame_rate.max(1) as f64;
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            next_deadline: None,
            frame_index: 0,
            opened: false,
            smoothing: TemporalSmoothing::default(),
        }
    }

    fn frame_interval_secs(&self) -> f32 {
        self.frame_interval.as_secs_f32()
    }

    /// Skeleton for the given frame index.
    pub fn skeleton_at(&self, index: u64) -> Skeleton {
        let t = index as f32 * self.frame_interval_secs();
        let phase = t / CYCLE_SECS * std::f32::consts::TAU;
        let sway = SWAY_AMPLITUDE_MM * phase.sin();
        let left_lift = STEP_HEIGHT_MM * phase.sin().max(0.0);
        let right_lift = STEP_HEIGHT_MM * (-phase.sin()).max(0.0);

        let mut skeleton = Skeleton::default();
        for (id, rest) in REST_POSE {
            let lift = match id {
                JointId::AnkleLeft | JointId::KneeLeft => left_lift,
                JointId::AnkleRight | JointId::KneeRight => right_lift,
                _ => 0.0,
            };
            let position = [rest[0] + sway, rest[1] - lift, rest[2] + BODY_DEPTH_MM];
            skeleton.set(id, JointSample::new(position, [1.0, 0.0, 0.0, 0.0]));
        }

        for (ankle, foot) in [
            (JointId::AnkleLeft, JointId::FootLeft),
            (JointId::AnkleRight, JointId::FootRight),
        ] {
            let a = skeleton.get(ankle).position;
            let position = [a[0] + FOOT_OFFSET[0], a[1] + FOOT_OFFSET[1], a[2] + FOOT_OFFSET[2]];
            skeleton.set(foot, JointSample::new(position, [1.0, 0.0, 0.0, 0.0]));
        }
        skeleton
    }
}

impl CaptureSource for SyntheticSource {
    type Frame = u64;

    fn open(&mut self, config: &DeviceConfig) -> Result<(), CaptureError> {
        log::info!("Synthetic source opened (depth mode {:?})", config.depth_mode);
        self.opened = true;
        self.next_deadline = None;
        self.smoothing.reset();
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<u64, CaptureError> {
        if !self.opened {
            return Err(CaptureError::AcquireFailed("source not opened".into()));
        }
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + self.frame_interval);

        let index = self.frame_index;
        self.frame_index += 1;
        Ok(index)
    }

    fn extract_skeleton(&mut self, frame: &u64, _timeout: Duration) -> Result<BodyFrame, CaptureError> {
        let timestamp_us = (*frame as f64 * self.frame_interval.as_secs_f64() * 1e6) as u64;
        let body = BodyFrame::single(timestamp_us, self.skeleton_at(*frame));
        Ok(self.smoothing.apply(body))
    }

    fn release_frame(&mut self, _frame: u64) {}

    fn set_temporal_smoothing(&mut self, factor: f32) {
        self.smoothing.set_factor(factor);
    }

    fn close(&mut self) {
        self.opened = false;
        log::info!("Synthetic source closed after {} frames", self.frame_index);
    }
}
