//! Deterministic signal components for synthetic sensor axes

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One additive component of a synthetic axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPattern {
    /// Constant offset (e.g. gravity on one axis)
    Constant { level: f64 },
    /// Pure tone
    Sinusoidal {
        frequency: f64,
        amplitude: f64,
        phase: f64,
    },
    /// Linear drift, the kind of trend detrending removes
    Drift { slope: f64 },
    /// On/off cycles of a fixed amplitude
    Burst {
        on_duration: f64,
        off_duration: f64,
        amplitude: f64,
    },
    /// Exponentially decaying tone
    Damped {
        frequency: f64,
        amplitude: f64,
        decay_rate: f64,
    },
}

impl SignalPattern {
    /// Value of the component at time `t` (seconds)
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            SignalPattern::Constant { level } => *level,

            SignalPattern::Sinusoidal { frequency, amplitude, phase } => {
                amplitude * (2.0 * PI * frequency * t + phase).sin()
            }

            SignalPattern::Drift { slope } => slope * t,

            SignalPattern::Burst { on_duration, off_duration, amplitude } => {
                let cycle = on_duration + off_duration;
                if cycle <= 0.0 {
                    return 0.0;
                }
                if t % cycle < *on_duration {
                    *amplitude
                } else {
                    0.0
                }
            }

            SignalPattern::Damped { frequency, amplitude, decay_rate } => {
                amplitude * (-decay_rate * t).exp() * (2.0 * PI * frequency * t).sin()
            }
        }
    }

    /// Preset components resembling common mobile-sensor activities
    pub fn presets() -> Vec<(&'static str, Vec<SignalPattern>)> {
        vec![
            ("Rest", vec![SignalPattern::Constant { level: 0.0 }]),
            (
                "Resting Tremor",
                vec![SignalPattern::Sinusoidal { frequency: 5.0, amplitude: 0.05, phase: 0.0 }],
            ),
            (
                "Walking",
                vec![
                    SignalPattern::Sinusoidal { frequency: 2.0, amplitude: 0.3, phase: 0.0 },
                    SignalPattern::Sinusoidal { frequency: 4.0, amplitude: 0.1, phase: 0.5 },
                ],
            ),
            (
                "Drifting Sensor",
                vec![
                    SignalPattern::Drift { slope: 0.05 },
                    SignalPattern::Sinusoidal { frequency: 6.0, amplitude: 0.2, phase: 0.0 },
                ],
            ),
            (
                "Tapping",
                vec![SignalPattern::Burst { on_duration: 0.1, off_duration: 0.4, amplitude: 1.0 }],
            ),
        ]
    }
}
