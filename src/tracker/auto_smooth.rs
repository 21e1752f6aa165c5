//! Adaptive temporal smoothing.
//!
//! Motion is accumulated from the ankle velocities of a frame and compared with a baseline of
//! recently observed motion. A spike above the threshold drops smoothing to zero; otherwise the
//! ramp approaches 1 exponentially.

/// Fraction of the remaining distance to 1 covered per still frame.
pub const RAMP_RATE: f64 = 0.45;

/// Per-frame retention of the motion baseline.
pub const BASELINE_DECAY: f64 = 0.02;

const INITIAL_BASELINE: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct AutoSmoother {
    ramp: f64,
    motion: f64,
    baseline: f64,
}

impl AutoSmoother {
    pub fn new() -> Self {
        Self {
            ramp: 0.0,
            motion: 0.0,
            baseline: INITIAL_BASELINE,
        }
    }

    /// Add one bone's linear velocity to this frame's motion.
    pub fn accumulate(&mut self, velocity: &[f64; 3]) {
        self.motion += velocity.iter().map(|v| v.abs()).sum::<f64>();
    }

    /// Close the frame: update the ramp against the baseline, decay the baseline, and return the
    /// smoothing factor to feed the extraction stage.
    pub fn advance(&mut self, threshold: f32) -> f32 {
        let ratio = if self.baseline > 0.0 {
            self.motion / self.baseline
        } else if self.motion > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        if ratio > threshold as f64 {
            self.ramp = 0.0;
        } else {
            self.ramp += RAMP_RATE * (1.0 - self.ramp);
        }

        self.baseline = self.motion.max(self.baseline * BASELINE_DECAY);
        self.motion = 0.0;
        self.ramp as f32
    }

    /// Drop the motion gathered this frame without touching the ramp (fixed smoothing mode).
    pub fn discard(&mut self) {
        self.motion = 0.0;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[cfg(test)]
    pub fn ramp(&self) -> f32 {
        self.ramp as f32
    }

    #[cfg(test)]
    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}

impl Default for AutoSmoother {
    fn default() -> Self {
        Self::new()
    }
}
