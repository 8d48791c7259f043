use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    beatmap::BeatmapBank, timeline::DEFAULT_IDLE_POLL, Beat, Beatmap, Difficulty, Result,
};

/// One song per built-in level, in level order.
const DEFAULT_PLAYLIST: [&str; 6] = [
    "music/KOTON.wav",
    "music/MCR_HOUSE_OF_WOLVES.wav",
    "music/THISISHOWIDISAPPEAR.wav",
    "music/MOZART.wav",
    "music/MARIO.wav",
    "music/ZELDA.wav",
];

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub player_name: String,
    pub difficulty: Difficulty,
    pub start_level: usize,
    pub playlist: Vec<String>,
    /// Custom levels. When empty the built-in bank is used.
    pub levels: Vec<LevelConfig>,
    pub scheduler: SchedulerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            player_name: "Player".to_string(),
            difficulty: Difficulty::default(),
            start_level: 0,
            playlist: DEFAULT_PLAYLIST.iter().map(|song| song.to_string()).collect(),
            levels: Vec::new(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), levels = config.levels.len(), "config loaded");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn beatmap_bank(&self) -> BeatmapBank {
        if self.levels.is_empty() {
            return BeatmapBank::builtin();
        }
        let beatmaps = self
            .levels
            .iter()
            .enumerate()
            .map(|(id, level)| Beatmap::new(id, level.beats.clone()))
            .collect();
        let names = self.levels.iter().map(|level| level.name.clone()).collect();
        BeatmapBank::new(beatmaps, names)
    }
}

/// A user-defined level. Lanes outside `0..4` are rejected while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub name: String,
    pub beats: Vec<Beat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub idle_poll_ms: u64,
    /// Fixed hit window; when absent the window follows the inter-beat delay.
    pub hit_window_ms: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            idle_poll_ms: DEFAULT_IDLE_POLL.as_millis() as u64,
            hit_window_ms: None,
        }
    }
}

impl SchedulerSettings {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn hit_window(&self) -> Option<Duration> {
        self.hit_window_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.playlist.len(), 6);
        assert_eq!(config.scheduler.idle_poll(), Duration::from_secs(1));
        assert_eq!(config.beatmap_bank().len(), 5);
    }

    #[test]
    fn default_playlist_follows_builtin_levels() {
        let config = AppConfig::default();
        let bank = config.beatmap_bank();
        assert!(config.playlist.len() >= bank.len());

        let normalize = |text: &str| -> String {
            text.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_uppercase()
        };
        for index in 0..bank.len() {
            let name = bank.name(index);
            let title = name.split(": ").nth(1).unwrap();
            let song = config.playlist[index]
                .trim_start_matches("music/")
                .trim_end_matches(".wav");
            assert_eq!(normalize(song), normalize(title), "level {index}");
        }
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = AppConfig::from_json(
            r#"{
                "player_name": "Ada",
                "difficulty": "hard",
                "scheduler": { "hit_window_ms": 300 },
                "levels": [{ "name": "Warmup", "beats": [0, 1, 2, 3] }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.player_name, "Ada");
        assert_eq!(config.difficulty, Difficulty::Hard);
        assert_eq!(config.scheduler.hit_window(), Some(Duration::from_millis(300)));
        assert_eq!(config.scheduler.idle_poll_ms, 1000);

        let bank = config.beatmap_bank();
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.name(0), "Warmup");
        assert_eq!(bank.get(0).unwrap().len(), 4);
    }

    #[test]
    fn rejects_out_of_range_lanes() {
        let err = AppConfig::from_json(r#"{ "levels": [{ "name": "x", "beats": [4] }] }"#);
        assert!(err.is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, crate::LaneBeatError::Io(_)));
    }
}
