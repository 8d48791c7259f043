use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{LaneBeatError, Result};

/// Number of pads on the playfield.
pub const LANE_COUNT: u8 = 4;

/// A single lane activation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Beat {
    lane: u8,
}

impl Beat {
    /// Creates a beat on `lane`, rejecting lanes outside `0..LANE_COUNT`.
    pub fn new(lane: u8) -> Result<Self> {
        if lane < LANE_COUNT {
            Ok(Self { lane })
        } else {
            Err(LaneBeatError::LaneOutOfRange {
                lane,
                lane_count: LANE_COUNT,
            })
        }
    }

    pub fn lane(&self) -> u8 {
        self.lane
    }
}

impl TryFrom<u8> for Beat {
    type Error = LaneBeatError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Beat> for u8 {
    fn from(beat: Beat) -> Self {
        beat.lane
    }
}

impl fmt::Display for Beat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Beat{{lane={}}}", self.lane)
    }
}

/// Ordered, immutable choreography for one level.
///
/// Clones share the underlying beat storage, so handing a beatmap to the
/// scheduler or to observers never copies the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beatmap {
    id: usize,
    beats: Arc<[Beat]>,
}

impl Beatmap {
    pub fn new(id: usize, beats: Vec<Beat>) -> Self {
        Self {
            id,
            beats: beats.into(),
        }
    }

    /// Builds a beatmap from raw lane indices, validating each one.
    pub fn from_lanes(id: usize, lanes: &[u8]) -> Result<Self> {
        let beats = lanes
            .iter()
            .map(|&lane| Beat::new(lane))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(id, beats))
    }

    /// A beatmap with no beats. The scheduler idles while it holds one.
    pub fn empty(id: usize) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn get(&self, index: usize) -> Option<Beat> {
        self.beats.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}

const BUILTIN_LANES: [[u8; 8]; 5] = [
    [0, 1, 2, 3, 0, 2, 1, 3],
    [3, 2, 1, 0, 3, 1, 2, 0],
    [1, 1, 2, 2, 0, 3, 0, 3],
    [2, 0, 2, 1, 3, 1, 0, 3],
    [0, 0, 0, 1, 2, 3, 2, 1],
];

const BUILTIN_NAMES: [&str; 6] = [
    "Level 1: KOTON",
    "Level 2: MCR House of Wolves",
    "Level 3: This is How I Disappear",
    "Level 4: Mozart",
    "Level 5: Mario",
    "Level 6: Zelda",
];

/// Ordered collection of selectable levels.
#[derive(Debug, Clone)]
pub struct BeatmapBank {
    beatmaps: Vec<Beatmap>,
    names: Vec<String>,
}

impl BeatmapBank {
    pub fn new(beatmaps: Vec<Beatmap>, names: Vec<String>) -> Self {
        Self { beatmaps, names }
    }

    /// The five stock levels shipped with the game.
    pub fn builtin() -> Self {
        let beatmaps = BUILTIN_LANES
            .iter()
            .enumerate()
            .map(|(id, lanes)| {
                let beats = lanes.iter().map(|&lane| Beat { lane }).collect();
                Beatmap::new(id, beats)
            })
            .collect();
        let names = BUILTIN_NAMES.iter().map(|name| name.to_string()).collect();
        Self::new(beatmaps, names)
    }

    pub fn len(&self) -> usize {
        self.beatmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beatmaps.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Beatmap> {
        self.beatmaps
            .get(index)
            .ok_or(LaneBeatError::LevelOutOfRange {
                index,
                available: self.beatmaps.len(),
            })
    }

    /// Display name of a level. Levels without a configured name fall back to
    /// a 1-based "Level N".
    pub fn name(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Level {}", index + 1))
    }

    pub fn next_index(&self, current: usize) -> usize {
        if self.beatmaps.is_empty() {
            return 0;
        }
        (current + 1) % self.beatmaps.len()
    }

    pub fn previous_index(&self, current: usize) -> usize {
        if self.beatmaps.is_empty() {
            return 0;
        }
        let len = self.beatmaps.len();
        (current % len + len - 1) % len
    }
}

impl Default for BeatmapBank {
    fn default() -> Self {
        Self::builtin()
    }
}
