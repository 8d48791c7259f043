//! Difficulty table and the pure timing conversions derived from it.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::LaneBeatError;

/// Lower and upper bounds for the music tempo step.
pub const MIN_TEMPO_STEP: i8 = -2;
pub const MAX_TEMPO_STEP: i8 = 3;

/// Hit windows are never narrower or wider than these bounds.
pub const MIN_HIT_WINDOW: Duration = Duration::from_millis(150);
pub const MAX_HIT_WINDOW: Duration = Duration::from_millis(800);

const HIT_WINDOW_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Maps the 1-based level number used by the tempo pad.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Easy),
            2 => Some(Self::Medium),
            3 => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn from_level_or_default(level: u8) -> Self {
        Self::from_level(level).unwrap_or_else(|| {
            tracing::warn!(level, "unknown difficulty level, defaulting to medium");
            Self::Medium
        })
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }

    /// Easy → Medium → Hard → Easy.
    pub fn cycle(self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            Self::Medium => Self::Hard,
            Self::Hard => Self::Easy,
        }
    }

    pub fn profile(self) -> DifficultyProfile {
        let (music_tempo_step, delay_ms) = match self {
            Self::Easy => (-2, 3_000),
            Self::Medium => (0, 2_500),
            Self::Hard => (3, 2_000),
        };
        let inter_beat_delay = Duration::from_millis(delay_ms);
        DifficultyProfile {
            difficulty: self,
            music_tempo_step,
            inter_beat_delay,
            description: format!(
                "{self} (music_tempo={music_tempo_step}, beat_tempo={:.1}s)",
                inter_beat_delay.as_secs_f64()
            ),
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        };
        f.write_str(name)
    }
}

impl FromStr for Difficulty {
    type Err = LaneBeatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" | "1" => Ok(Self::Easy),
            "medium" | "2" => Ok(Self::Medium),
            "hard" | "3" => Ok(Self::Hard),
            other => Err(LaneBeatError::msg(format!(
                "unknown difficulty `{other}` (expected easy, medium or hard)"
            ))),
        }
    }
}

/// Timing parameters a difficulty feeds into the scheduler and music player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultyProfile {
    pub difficulty: Difficulty,
    pub music_tempo_step: i8,
    #[serde(with = "duration_secs")]
    pub inter_beat_delay: Duration,
    pub description: String,
}

impl DifficultyProfile {
    pub fn hit_window(&self) -> Duration {
        hit_window_for(self.inter_beat_delay)
    }

    pub fn tempo_factor(&self) -> f32 {
        tempo_factor(self.music_tempo_step)
    }
}

/// Playback speed multiplier for a tempo step, `1.0 + 0.1 * step` after
/// clamping the step into `[MIN_TEMPO_STEP, MAX_TEMPO_STEP]`.
pub fn tempo_factor(step: i8) -> f32 {
    let clamped = step.clamp(MIN_TEMPO_STEP, MAX_TEMPO_STEP);
    1.0 + 0.1 * f32::from(clamped)
}

/// Hit window for an inter-beat delay: 90% of the delay, clamped into
/// `[MIN_HIT_WINDOW, MAX_HIT_WINDOW]`.
pub fn hit_window_for(inter_beat_delay: Duration) -> Duration {
    let millis = inter_beat_delay.as_secs_f64() * 1000.0 * HIT_WINDOW_RATIO;
    let window = Duration::from_millis(millis.round() as u64);
    window.clamp(MIN_HIT_WINDOW, MAX_HIT_WINDOW)
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn hit_window_is_clamped() {
        assert_eq!(
            hit_window_for(Duration::from_millis(100)),
            Duration::from_millis(150)
        );
        assert_eq!(
            hit_window_for(Duration::from_secs(2)),
            Duration::from_millis(800)
        );
        assert_eq!(
            hit_window_for(Duration::from_millis(500)),
            Duration::from_millis(450)
        );
    }

    #[test]
    fn tempo_factor_clamps_step() {
        assert_relative_eq!(tempo_factor(0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(tempo_factor(-2), 0.8, epsilon = 1e-6);
        assert_relative_eq!(tempo_factor(3), 1.3, epsilon = 1e-6);
        assert_relative_eq!(tempo_factor(7), 1.3, epsilon = 1e-6);
        assert_relative_eq!(tempo_factor(-9), 0.8, epsilon = 1e-6);
    }

    #[test]
    fn profiles_match_level_table() {
        let easy = Difficulty::Easy.profile();
        assert_eq!(easy.music_tempo_step, -2);
        assert_eq!(easy.inter_beat_delay, Duration::from_secs(3));
        assert_eq!(easy.description, "Easy (music_tempo=-2, beat_tempo=3.0s)");

        let hard = Difficulty::Hard.profile();
        assert_eq!(hard.music_tempo_step, 3);
        assert_eq!(hard.inter_beat_delay, Duration::from_secs(2));
        assert_eq!(hard.hit_window(), MAX_HIT_WINDOW);
    }

    #[test]
    fn levels_cycle_and_fall_back() {
        assert_eq!(Difficulty::Hard.cycle(), Difficulty::Easy);
        assert_eq!(Difficulty::from_level(0), None);
        assert_eq!(Difficulty::from_level_or_default(9), Difficulty::Medium);
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("insane".parse::<Difficulty>().is_err());
    }
}
