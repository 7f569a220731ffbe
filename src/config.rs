// src/config.rs

use crate::voice::FadeCurve;

/// Startup configuration shared by the control and audio sides.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,

    /// Crossfade length applied when a voice's definition changes.
    /// Zero makes every update a hard cut.
    pub crossfade_ms: f64,

    pub curve: FadeCurve,

    /// Maximum number of simultaneously defined labels.
    pub max_voices: usize,

    /// Interleaved output channels; the mono mix is copied to each.
    pub channels: usize,

    /// Slots in the control -> engine command ring.
    pub command_capacity: usize,

    /// Slots in the engine -> control event ring and the engine's outbox.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            crossfade_ms: 50.0,
            curve: FadeCurve::EqualPower,
            max_voices: 64,
            channels: 1,
            command_capacity: 16,
            event_capacity: 1024,
        }
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("sample rate must be a positive finite number, got {0}")]
    SampleRate(f64),

    #[error("crossfade must be a non-negative finite number of milliseconds, got {0}")]
    Crossfade(f64),

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(self.crossfade_ms.is_finite() && self.crossfade_ms >= 0.0) {
            return Err(ConfigError::Crossfade(self.crossfade_ms));
        }
        for (name, value) in [
            ("max_voices", self.max_voices),
            ("channels", self.channels),
            ("command_capacity", self.command_capacity),
            ("event_capacity", self.event_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    /// Crossfade length in frames at the configured sample rate.
    pub fn crossfade_frames(&self) -> u32 {
        frames_for(self.crossfade_ms, self.sample_rate)
    }
}

/// Convert milliseconds to a whole number of frames.
pub fn frames_for(millis: f64, sample_rate: f64) -> u32 {
    let frames = (millis * 0.001 * sample_rate).round();
    if frames.is_finite() && frames > 0.0 {
        frames.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.crossfade_frames(), 2205);
    }

    #[test]
    fn rejects_nonsense() {
        let bad_rate = EngineConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(bad_rate.validate(), Err(ConfigError::SampleRate(0.0)));

        let bad_fade = EngineConfig {
            crossfade_ms: -1.0,
            ..Default::default()
        };
        assert_eq!(bad_fade.validate(), Err(ConfigError::Crossfade(-1.0)));

        let no_channels = EngineConfig {
            channels: 0,
            ..Default::default()
        };
        assert_eq!(no_channels.validate(), Err(ConfigError::Zero("channels")));
    }

    #[test]
    fn zero_crossfade_is_zero_frames() {
        assert_eq!(frames_for(0.0, 48_000.0), 0);
        assert_eq!(frames_for(10.0, 48_000.0), 480);
    }
}
