//! Core library for the Lanebeat rhythm game.
//!
//! Input packets arrive from pad devices and fan out through a [`PacketHub`]
//! to per-source filters. Lane hits feed the beat [`Scheduler`], which walks
//! the current [`Beatmap`] on a wall-clock cadence and judges each hit
//! against the active beat's deadline. The [`LevelManager`] and
//! [`MusicController`] keep the level selection, the song and the pause
//! state in step, and a [`GameSession`] wires all of it from an
//! [`AppConfig`].

pub mod audio;
pub mod beatmap;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod input;
pub mod judge;
pub mod level;
pub mod observer;
pub mod session;
pub mod timeline;

pub use audio::{MusicController, MusicPlayer, TracingPlayer};
pub use beatmap::{Beat, Beatmap, BeatmapBank, LANE_COUNT};
pub use config::{AppConfig, LevelConfig, SchedulerSettings};
pub use difficulty::{Difficulty, DifficultyProfile};
pub use error::{LaneBeatError, Result};
pub use input::{
    pump, ControlButton, InputPacket, LaneHit, PacketHub, PacketObserver, PacketReader,
    ReadOutcome, SourceFilter, SourceId,
};
pub use judge::{BeatEvent, BeatObserver, ChannelObserver, Judgment, ScoreSummary, Scoreboard};
pub use level::{LevelManager, LevelObserver};
pub use observer::ObserverSet;
pub use session::GameSession;
pub use timeline::{ActiveBeat, Scheduler, SchedulerConfig};
