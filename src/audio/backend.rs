//! Output device abstraction
//!
//! The engine only needs gain-node primitives from whatever actually plays
//! audio: acquire the output, create a gain control per source, ramp it
//! smoothly. [`SoftwareBackend`] is the built-in implementation; it models
//! ramps with wall-clock interpolation so gain values are observable without
//! a sound card.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::AudioError;

/// Opaque handle to a remote audio stream delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle(pub String);

impl StreamHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

/// A per-source volume control supporting smooth ramped transitions
pub trait GainNode: Send + Sync {
    /// Gain value at this instant, including mid-ramp values
    fn current(&self) -> f32;

    /// The most recently requested ramp target
    fn target(&self) -> f32;

    /// Linear ramp to `target`. The ramp starts from the value read *now*,
    /// so a new ramp issued mid-flight picks up where the old one actually
    /// is rather than where it was headed.
    fn ramp_to(&self, target: f32, duration: Duration);

    /// Detach from the output graph; later ramps are ignored
    fn disconnect(&self);
}

/// Gain-node factory over an acquired audio output
pub trait AudioBackend: Send + Sync {
    /// Acquire the output device. May legitimately fail until a later user
    /// gesture grants audio access.
    fn acquire(&self) -> Result<(), AudioError>;

    /// Create a gain control wired between `stream` and the output
    fn create_gain(
        &self,
        stream: &StreamHandle,
        initial: f32,
    ) -> Result<Box<dyn GainNode>, AudioError>;
}

struct RampState {
    start_value: f32,
    target: f32,
    started: Instant,
    duration: Duration,
}

/// Software gain control: pure value tracking, no DSP
pub struct SoftwareGain {
    ramp: Mutex<RampState>,
    connected: AtomicBool,
}

impl SoftwareGain {
    pub fn new(initial: f32) -> Self {
        Self {
            ramp: Mutex::new(RampState {
                start_value: initial,
                target: initial,
                started: Instant::now(),
                duration: Duration::ZERO,
            }),
            connected: AtomicBool::new(true),
        }
    }
}

impl GainNode for SoftwareGain {
    fn current(&self) -> f32 {
        let ramp = self.ramp.lock();
        if ramp.duration.is_zero() {
            return ramp.target;
        }
        let elapsed = ramp.started.elapsed();
        if elapsed >= ramp.duration {
            ramp.target
        } else {
            let progress = elapsed.as_secs_f32() / ramp.duration.as_secs_f32();
            ramp.start_value + (ramp.target - ramp.start_value) * progress
        }
    }

    fn target(&self) -> f32 {
        self.ramp.lock().target
    }

    fn ramp_to(&self, target: f32, duration: Duration) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }
        let start_value = self.current();
        let mut ramp = self.ramp.lock();
        *ramp = RampState {
            start_value,
            target,
            started: Instant::now(),
            duration,
        };
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// Backend producing [`SoftwareGain`] nodes; acquisition always succeeds
#[derive(Default)]
pub struct SoftwareBackend;

impl AudioBackend for SoftwareBackend {
    fn acquire(&self) -> Result<(), AudioError> {
        Ok(())
    }

    fn create_gain(
        &self,
        _stream: &StreamHandle,
        initial: f32,
    ) -> Result<Box<dyn GainNode>, AudioError> {
        Ok(Box::new(SoftwareGain::new(initial)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_ramp_reaches_target() {
        let gain = SoftwareGain::new(0.0);
        gain.ramp_to(1.0, Duration::ZERO);
        assert_eq!(gain.current(), 1.0);
        assert_eq!(gain.target(), 1.0);
    }

    #[test]
    fn test_new_ramp_starts_from_current_value() {
        let gain = SoftwareGain::new(0.0);
        gain.ramp_to(1.0, Duration::ZERO);
        // Interrupt with a long ramp downward: it must begin at 1.0, the
        // value read at call time, not at some stale start value.
        gain.ramp_to(0.0, Duration::from_secs(3600));
        let now = gain.current();
        assert!(now > 0.99, "ramp should start near 1.0, got {now}");
    }

    #[test]
    fn test_disconnected_gain_ignores_ramps() {
        let gain = SoftwareGain::new(0.4);
        gain.disconnect();
        gain.ramp_to(1.0, Duration::ZERO);
        assert_eq!(gain.current(), 0.4);
    }
}
