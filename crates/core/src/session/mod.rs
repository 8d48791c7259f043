//! One running game: input hub, filtered sources, scheduler, music and levels
//! wired together from an [`AppConfig`].

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    audio::{MusicController, MusicPlayer},
    input::{decode_difficulty, InputPacket, PacketHub, PacketObserver, SourceFilter, SourceId},
    level::{LevelManager, LevelObserver},
    timeline::{Scheduler, SchedulerConfig},
    AppConfig, BeatObserver, Difficulty, Result,
};

/// Applies difficulty changes to the scheduler timing and the music tempo.
struct DifficultyControl {
    current: Mutex<Difficulty>,
    hit_window_override: Option<Duration>,
    scheduler: Arc<Scheduler>,
    music: Arc<MusicController>,
}

impl DifficultyControl {
    fn apply(&self, difficulty: Difficulty) {
        *self.current.lock() = difficulty;
        let profile = difficulty.profile();
        self.scheduler.set_inter_beat_delay(profile.inter_beat_delay);
        if let Some(window) = self.hit_window_override {
            self.scheduler.set_hit_window(window);
        }
        self.music.set_tempo_step(profile.music_tempo_step);
        tracing::info!(%difficulty, description = profile.description, "difficulty applied");
    }

    fn current(&self) -> Difficulty {
        *self.current.lock()
    }
}

impl PacketObserver for DifficultyControl {
    fn on_packet(&self, packet: InputPacket) {
        match decode_difficulty(packet) {
            Some(difficulty) => self.apply(difficulty),
            None => tracing::warn!(payload = packet.payload, "dropping unknown difficulty level"),
        }
    }
}

pub struct GameSession {
    player_name: String,
    start_level: usize,
    hub: Arc<PacketHub>,
    scheduler: Arc<Scheduler>,
    music: Arc<MusicController>,
    levels: Arc<LevelManager>,
    difficulty: Arc<DifficultyControl>,
    // Kept so the subscriptions stay registered for the session's lifetime.
    _filters: [Arc<SourceFilter>; 3],
}

impl GameSession {
    /// Wires the session and loads `config.start_level`.
    pub fn start(config: &AppConfig, player: Arc<dyn MusicPlayer>) -> Result<Self> {
        let session = Self::new(config, player)?;
        session.begin()?;
        Ok(session)
    }

    /// Spawns the scheduler and the music controller and subscribes everything
    /// to a fresh packet hub. Nothing plays until [`GameSession::begin`].
    pub fn new(config: &AppConfig, player: Arc<dyn MusicPlayer>) -> Result<Self> {
        let profile = config.difficulty.profile();
        let hit_window_override = config.scheduler.hit_window();

        let mut scheduler_config = SchedulerConfig::from_delay(profile.inter_beat_delay);
        if let Some(window) = hit_window_override {
            scheduler_config = scheduler_config.with_hit_window(window);
        }
        let scheduler = Arc::new(Scheduler::spawn_with_idle_poll(
            scheduler_config,
            config.scheduler.idle_poll(),
        )?);
        let music = Arc::new(MusicController::spawn(player, config.playlist.clone())?);
        music.set_tempo_step(profile.music_tempo_step);

        let levels = LevelManager::new(config.beatmap_bank(), scheduler.clone(), music.clone());
        let difficulty = Arc::new(DifficultyControl {
            current: Mutex::new(config.difficulty),
            hit_window_override,
            scheduler: scheduler.clone(),
            music: music.clone(),
        });

        let hub = Arc::new(PacketHub::new());
        let gameplay = SourceFilter::attach(&hub, SourceId::Gameplay);
        gameplay.register_observer(scheduler.clone());
        let control = SourceFilter::attach(&hub, SourceId::SystemControl);
        control.register_observer(levels.clone());
        let tempo = SourceFilter::attach(&hub, SourceId::Tempo);
        tempo.register_observer(difficulty.clone());

        Ok(Self {
            player_name: config.player_name.clone(),
            start_level: config.start_level,
            hub,
            scheduler,
            music,
            levels,
            difficulty,
            _filters: [gameplay, control, tempo],
        })
    }

    /// Loads the configured start level.
    pub fn begin(&self) -> Result<()> {
        self.levels.load_level(self.start_level)?;
        tracing::info!(
            player = %self.player_name,
            difficulty = %self.difficulty(),
            level = self.start_level,
            "session started"
        );
        Ok(())
    }

    /// Feeds one packet through the hub as if a device had sent it.
    pub fn publish(&self, packet: InputPacket) {
        self.hub.publish(packet);
    }

    pub fn hub(&self) -> &Arc<PacketHub> {
        &self.hub
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn music(&self) -> &Arc<MusicController> {
        &self.music
    }

    pub fn levels(&self) -> &Arc<LevelManager> {
        &self.levels
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty.current()
    }

    pub fn set_difficulty(&self, difficulty: Difficulty) {
        self.difficulty.apply(difficulty);
    }

    /// Easy → Medium → Hard → Easy.
    pub fn cycle_difficulty(&self) -> Difficulty {
        let next = self.difficulty().cycle();
        self.set_difficulty(next);
        next
    }

    pub fn register_beat_observer(&self, observer: Arc<dyn BeatObserver>) -> bool {
        self.scheduler.register_observer(observer)
    }

    pub fn register_level_observer(&self, observer: Arc<dyn LevelObserver>) -> bool {
        self.levels.register_observer(observer)
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.music.stop();
        tracing::info!(player = %self.player_name, "session stopped");
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("player_name", &self.player_name)
            .field("difficulty", &self.difficulty())
            .field("levels", &self.levels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{unbounded, Receiver};

    use super::*;
    use crate::{
        audio::TracingPlayer,
        config::{LevelConfig, SchedulerSettings},
        input::ControlButton,
        Beat, BeatEvent, ChannelObserver, Judgment,
    };

    fn config(beats: &[u8], hit_window_ms: Option<u64>) -> AppConfig {
        AppConfig {
            levels: vec![
                LevelConfig {
                    name: "First".to_string(),
                    beats: beats.iter().map(|&lane| Beat::new(lane).unwrap()).collect(),
                },
                LevelConfig {
                    name: "Second".to_string(),
                    beats: vec![Beat::new(3).unwrap()],
                },
            ],
            playlist: vec!["a.wav".to_string(), "b.wav".to_string()],
            scheduler: SchedulerSettings {
                idle_poll_ms: 20,
                hit_window_ms,
            },
            ..AppConfig::default()
        }
    }

    fn start(config: &AppConfig) -> (GameSession, Receiver<BeatEvent>) {
        let session = GameSession::new(config, Arc::new(TracingPlayer::default())).unwrap();
        let (tx, rx) = unbounded();
        session.register_beat_observer(Arc::new(ChannelObserver::new(tx)));
        session.begin().unwrap();
        (session, rx)
    }

    fn next_activation(rx: &Receiver<BeatEvent>) -> u8 {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                BeatEvent::BeatActivated { lane } => return lane,
                _ => continue,
            }
        }
    }

    fn next_result(rx: &Receiver<BeatEvent>) -> (u8, Judgment) {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                BeatEvent::HitResult { lane, judgment } => return (lane, judgment),
                _ => continue,
            }
        }
    }

    #[test]
    fn gameplay_packets_reach_the_judge() {
        let (session, rx) = start(&config(&[1, 2], Some(5_000)));

        assert_eq!(next_activation(&rx), 1);
        session.publish(InputPacket::lane_hit(1));
        assert_eq!(next_result(&rx), (1, Judgment::Good));

        assert_eq!(next_activation(&rx), 2);
        session.publish(InputPacket::lane_hit(0));
        assert_eq!(next_result(&rx), (2, Judgment::WrongLane));
        session.shutdown();
    }

    #[test]
    fn control_packets_switch_levels() {
        let (session, rx) = start(&config(&[0, 0, 0], Some(5_000)));
        assert_eq!(next_activation(&rx), 0);

        session.publish(InputPacket::control(ControlButton::Next));
        assert_eq!(session.levels().current_level(), 1);
        assert_eq!(session.music().current_song(), 1);
        assert_eq!(next_activation(&rx), 3);
        session.shutdown();
    }

    #[test]
    fn tempo_packets_change_difficulty() {
        let (session, _rx) = start(&config(&[0], None));
        assert_eq!(session.difficulty(), Difficulty::Medium);

        session.publish(InputPacket::difficulty(Difficulty::Hard));
        assert_eq!(session.difficulty(), Difficulty::Hard);
        let timing = session.scheduler().config();
        assert_eq!(timing.inter_beat_delay, Duration::from_secs(2));
        assert_eq!(timing.hit_window, Duration::from_millis(800));

        session.publish(InputPacket::new(SourceId::Tempo, 9));
        assert_eq!(session.difficulty(), Difficulty::Hard);

        assert_eq!(session.cycle_difficulty(), Difficulty::Easy);
        assert_eq!(session.scheduler().config().inter_beat_delay, Duration::from_secs(3));
        session.shutdown();
    }

    #[test]
    fn hit_window_override_survives_difficulty_changes() {
        let (session, _rx) = start(&config(&[0], Some(250)));
        session.set_difficulty(Difficulty::Easy);
        assert_eq!(session.scheduler().config().hit_window, Duration::from_millis(250));
        session.shutdown();
    }

    #[test]
    fn invalid_start_level_fails() {
        let config = AppConfig {
            start_level: 7,
            ..AppConfig::default()
        };
        assert!(GameSession::start(&config, Arc::new(TracingPlayer::default())).is_err());
    }
}
