use std::{fmt, time::Instant};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome assigned to a beat. Every beat receives at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Judgment {
    Good,
    WrongLane,
    MissTimeout,
}

impl Judgment {
    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Good => "GOOD",
            Self::WrongLane => "WRONG_LANE",
            Self::MissTimeout => "MISS_TIMEOUT",
        };
        f.write_str(label)
    }
}

/// Judges a hit on `hit_lane` at `now` against a beat expecting
/// `expected_lane` whose window closes at `deadline`.
///
/// Lateness wins over lane: a hit after the deadline is a timeout whichever
/// pad was pressed.
pub fn judge_hit(expected_lane: u8, hit_lane: u8, now: Instant, deadline: Instant) -> Judgment {
    if now > deadline {
        Judgment::MissTimeout
    } else if hit_lane != expected_lane {
        Judgment::WrongLane
    } else {
        Judgment::Good
    }
}

/// Game-level notifications emitted by the scheduler.
///
/// All methods default to no-ops so consumers only implement what they use.
pub trait BeatObserver: Send + Sync {
    fn on_beat_activated(&self, _lane: u8) {}
    fn on_hit_result(&self, _lane: u8, _judgment: Judgment) {}
    fn on_sequence_end(&self) {}
    fn on_beatmap_changed(&self, _message: &str) {}
    fn on_beatmap_index_changed(&self, _index: usize) {}
}

/// Owned form of a [`BeatObserver`] callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BeatEvent {
    BeatActivated { lane: u8 },
    HitResult { lane: u8, judgment: Judgment },
    SequenceEnd,
    BeatmapChanged { message: String },
    BeatmapIndexChanged { index: usize },
}

/// Forwards every notification into a channel without ever blocking the
/// notifying thread. Events that do not fit are dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<BeatEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<BeatEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: BeatEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "beat event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("beat event receiver gone");
            }
        }
    }
}

impl BeatObserver for ChannelObserver {
    fn on_beat_activated(&self, lane: u8) {
        self.forward(BeatEvent::BeatActivated { lane });
    }

    fn on_hit_result(&self, lane: u8, judgment: Judgment) {
        self.forward(BeatEvent::HitResult { lane, judgment });
    }

    fn on_sequence_end(&self) {
        self.forward(BeatEvent::SequenceEnd);
    }

    fn on_beatmap_changed(&self, message: &str) {
        self.forward(BeatEvent::BeatmapChanged {
            message: message.to_string(),
        });
    }

    fn on_beatmap_index_changed(&self, index: usize) {
        self.forward(BeatEvent::BeatmapIndexChanged { index });
    }
}

/// Running tally of judgments. Score is the number of GOOD hits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreSummary {
    pub score: u32,
    pub good: u32,
    pub wrong_lane: u32,
    pub missed: u32,
    pub beatmap_index: usize,
    pub sequence_ended: bool,
}

#[derive(Debug, Default)]
pub struct Scoreboard {
    summary: Mutex<ScoreSummary>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> ScoreSummary {
        self.summary.lock().clone()
    }

    pub fn reset(&self) {
        let mut summary = self.summary.lock();
        let beatmap_index = summary.beatmap_index;
        *summary = ScoreSummary {
            beatmap_index,
            ..ScoreSummary::default()
        };
    }
}

impl BeatObserver for Scoreboard {
    fn on_hit_result(&self, _lane: u8, judgment: Judgment) {
        let mut summary = self.summary.lock();
        match judgment {
            Judgment::Good => {
                summary.good += 1;
                summary.score += 1;
            }
            Judgment::WrongLane => summary.wrong_lane += 1,
            Judgment::MissTimeout => summary.missed += 1,
        }
    }

    fn on_sequence_end(&self) {
        self.summary.lock().sequence_ended = true;
    }

    fn on_beatmap_changed(&self, _message: &str) {
        self.summary.lock().sequence_ended = false;
    }

    fn on_beatmap_index_changed(&self, index: usize) {
        self.summary.lock().beatmap_index = index;
    }
}
