//! Volume and Mute Control
//!
//! One controller for both endpoint (device-wide) and session (per-process)
//! volume. Every helper is expressed in terms of the target's range and
//! current value: endpoint volume is in dB as reported by the device, session
//! volume is a linear 0.0-1.0 scalar.

use serde::{Deserialize, Serialize};

use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};

/// Step used for session (linear) volume
pub const SESSION_VOLUME_STEP: f32 = 0.01;

/// Rounding slack allowed when a step lands on a range bound
const STEP_EPSILON: f32 = 1e-4;

/// What a volume operation applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeTarget {
    Endpoint(EndpointRef),
    Session { endpoint: EndpointRef, pid: u32 },
}

/// Valid volume values for a target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl VolumeRange {
    /// Linear range used by sessions
    pub const fn session() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            step: SESSION_VOLUME_STEP,
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether a stepped value lands in the range, allowing for float rounding
    /// in the step arithmetic
    fn admits_step(&self, value: f32) -> bool {
        value >= self.min - STEP_EPSILON && value <= self.max + STEP_EPSILON
    }

    /// Position of `value` in the range, 0.0 at min and 1.0 at max
    pub fn percent(&self, value: f32) -> f32 {
        if self.max == self.min {
            return 1.0;
        }
        (value - self.min) / (self.max - self.min)
    }

    pub fn from_percent(&self, percent: f32) -> f32 {
        self.min + percent.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// Platform volume operations
pub trait VolumeBackend {
    fn range(&self, target: &VolumeTarget) -> Result<VolumeRange>;
    fn volume(&self, target: &VolumeTarget) -> Result<f32>;
    fn set_volume(&self, target: &VolumeTarget, value: f32) -> Result<()>;
    fn is_muted(&self, target: &VolumeTarget) -> Result<bool>;
    fn set_mute(&self, target: &VolumeTarget, muted: bool) -> Result<()>;
}

/// Uniform volume/mute API over a [`VolumeBackend`]
pub struct VolumeController<B: VolumeBackend> {
    backend: B,
}

impl<B: VolumeBackend> VolumeController<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn get_range(&self, target: &VolumeTarget) -> Result<VolumeRange> {
        self.backend.range(target)
    }

    pub fn get_volume(&self, target: &VolumeTarget) -> Result<f32> {
        self.backend.volume(target)
    }

    /// Set an absolute value; values outside the range are rejected
    pub fn set_volume(&self, target: &VolumeTarget, value: f32) -> Result<()> {
        let range = self.backend.range(target)?;
        if !range.contains(value) {
            return Err(AudioError::VolumeOutOfRange {
                value,
                min: range.min,
                max: range.max,
            });
        }
        tracing::debug!("Setting volume of {:?} to {}", target, value);
        self.backend.set_volume(target, value)
    }

    /// Raise by one step; returns the new value, or the unchanged one when
    /// the step would pass `max`
    pub fn increment(&self, target: &VolumeTarget) -> Result<f32> {
        self.step_by(target, 1.0)
    }

    /// Lower by one step; returns the new value, or the unchanged one when
    /// the step would pass `min`
    pub fn decrement(&self, target: &VolumeTarget) -> Result<f32> {
        self.step_by(target, -1.0)
    }

    fn step_by(&self, target: &VolumeTarget, sign: f32) -> Result<f32> {
        let range = self.backend.range(target)?;
        let current = self.backend.volume(target)?;
        let next = current + sign * range.step;

        if !range.admits_step(next) {
            tracing::debug!("Volume step rejected for {:?}: {} is outside range", target, next);
            return Ok(current);
        }

        let next = next.clamp(range.min, range.max);
        self.backend.set_volume(target, next)?;
        Ok(next)
    }

    pub fn set_min(&self, target: &VolumeTarget) -> Result<()> {
        let range = self.backend.range(target)?;
        self.backend.set_volume(target, range.min)
    }

    pub fn set_max(&self, target: &VolumeTarget) -> Result<()> {
        let range = self.backend.range(target)?;
        self.backend.set_volume(target, range.max)
    }

    /// Current volume normalized to 0.0-1.0; exactly 1.0 for fixed-volume targets
    pub fn get_percent(&self, target: &VolumeTarget) -> Result<f32> {
        let range = self.backend.range(target)?;
        let current = self.backend.volume(target)?;
        Ok(range.percent(current))
    }

    pub fn set_percent(&self, target: &VolumeTarget, percent: f32) -> Result<()> {
        let range = self.backend.range(target)?;
        self.backend.set_volume(target, range.from_percent(percent))
    }

    pub fn is_muted(&self, target: &VolumeTarget) -> Result<bool> {
        self.backend.is_muted(target)
    }

    pub fn mute(&self, target: &VolumeTarget) -> Result<()> {
        self.backend.set_mute(target, true)
    }

    pub fn unmute(&self, target: &VolumeTarget) -> Result<()> {
        self.backend.set_mute(target, false)
    }

    /// Flip the mute flag; returns the new state
    pub fn toggle_mute(&self, target: &VolumeTarget) -> Result<bool> {
        let muted = !self.backend.is_muted(target)?;
        self.backend.set_mute(target, muted)?;
        Ok(muted)
    }
}
