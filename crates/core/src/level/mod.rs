use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    audio::MusicController,
    beatmap::BeatmapBank,
    input::{ControlButton, InputPacket, PacketObserver},
    timeline::Scheduler,
    BeatObserver, ObserverSet, Result,
};

/// Level-level notifications for front ends.
pub trait LevelObserver: Send + Sync {
    fn on_level_changed(&self, _index: usize, _name: &str) {}
    fn on_pause_state_changed(&self, _paused: bool) {}
    fn on_sequence_end(&self) {}
}

#[derive(Debug, Default)]
struct LevelState {
    current: usize,
    paused: bool,
}

/// Owns the level bank and keeps the scheduler and the music in step with the
/// selected level and the session's pause state.
///
/// The internal lock is never held while calling into the scheduler or the
/// music controller, since both may call back into the manager.
pub struct LevelManager {
    bank: BeatmapBank,
    scheduler: Arc<Scheduler>,
    music: Arc<MusicController>,
    state: Mutex<LevelState>,
    observers: ObserverSet<dyn LevelObserver>,
}

impl LevelManager {
    /// Builds the manager and subscribes it to the scheduler's sequence end.
    /// No level is loaded until [`LevelManager::load_level`] is called.
    pub fn new(
        bank: BeatmapBank,
        scheduler: Arc<Scheduler>,
        music: Arc<MusicController>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            bank,
            scheduler,
            music,
            state: Mutex::new(LevelState::default()),
            observers: ObserverSet::new("levels"),
        });
        manager.scheduler.register_observer(Arc::new(SequenceEndRelay {
            manager: Arc::downgrade(&manager),
        }));
        manager
    }

    pub fn register_observer(&self, observer: Arc<dyn LevelObserver>) -> bool {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn LevelObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub fn bank(&self) -> &BeatmapBank {
        &self.bank
    }

    pub fn current_level(&self) -> usize {
        self.state.lock().current
    }

    pub fn current_level_name(&self) -> String {
        self.bank.name(self.current_level())
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Switches to level `index`: the scheduler gets its beatmap, a paused
    /// session is resumed and the matching song starts from the top.
    pub fn load_level(&self, index: usize) -> Result<()> {
        let beatmap = match self.bank.get(index) {
            Ok(beatmap) => beatmap.clone(),
            Err(err) => {
                tracing::warn!(error = %err, "level not loaded");
                return Err(err);
            }
        };

        let was_paused = {
            let mut state = self.state.lock();
            state.current = index;
            std::mem::replace(&mut state.paused, false)
        };

        self.scheduler.set_beatmap(beatmap);
        if was_paused {
            self.scheduler.resume();
        }
        self.music.start_song(index);

        let name = self.bank.name(index);
        tracing::info!(index, name = %name, "level loaded");
        if was_paused {
            self.observers
                .notify("pause_state_changed", |o| o.on_pause_state_changed(false));
        }
        self.observers
            .notify("level_changed", |o| o.on_level_changed(index, &name));
        Ok(())
    }

    pub fn next_level(&self) -> Result<()> {
        let next = self.bank.next_index(self.current_level());
        self.load_level(next)
    }

    pub fn previous_level(&self) -> Result<()> {
        let previous = self.bank.previous_index(self.current_level());
        self.load_level(previous)
    }

    /// Flips the session between playing and paused. Returns the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = {
            let mut state = self.state.lock();
            state.paused = !state.paused;
            state.paused
        };

        if paused {
            self.music.pause();
            self.scheduler.pause();
        } else {
            self.music.resume();
            self.scheduler.resume();
        }

        tracing::info!(paused, "pause toggled");
        self.observers
            .notify("pause_state_changed", |o| o.on_pause_state_changed(paused));
        paused
    }

    /// The music stops at the end of a level; the scheduler stays live so the
    /// next level starts straight away.
    fn handle_sequence_end(&self) {
        let newly_paused = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.paused, true)
        };
        if newly_paused {
            self.music.pause();
        }
        self.scheduler.resume();

        tracing::info!(level = self.current_level(), "level finished");
        self.observers.notify("sequence_end", |o| o.on_sequence_end());
    }
}

impl PacketObserver for LevelManager {
    fn on_packet(&self, packet: InputPacket) {
        let Some(button) = ControlButton::decode(packet) else {
            tracing::debug!(payload = packet.payload, "unknown control button");
            return;
        };
        let outcome = match button {
            ControlButton::Previous => self.previous_level(),
            ControlButton::Next => self.next_level(),
            ControlButton::PauseToggle => {
                self.toggle_pause();
                Ok(())
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(error = %err, ?button, "control button failed");
        }
    }
}

impl std::fmt::Debug for LevelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelManager")
            .field("levels", &self.bank.len())
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Scheduler observer holding the manager weakly, so the scheduler's observer
/// list does not keep the manager alive.
struct SequenceEndRelay {
    manager: Weak<LevelManager>,
}

impl BeatObserver for SequenceEndRelay {
    fn on_sequence_end(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_sequence_end();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver, Sender};

    use super::*;
    use crate::{
        audio::TracingPlayer, timeline::SchedulerConfig, BeatEvent, Beatmap, ChannelObserver,
    };

    #[derive(Debug, PartialEq)]
    enum LevelEvent {
        Changed(usize, String),
        Paused(bool),
        Ended,
    }

    struct Recorder(Sender<LevelEvent>);

    impl LevelObserver for Recorder {
        fn on_level_changed(&self, index: usize, name: &str) {
            let _ = self.0.send(LevelEvent::Changed(index, name.to_string()));
        }
        fn on_pause_state_changed(&self, paused: bool) {
            let _ = self.0.send(LevelEvent::Paused(paused));
        }
        fn on_sequence_end(&self) {
            let _ = self.0.send(LevelEvent::Ended);
        }
    }

    struct Fixture {
        manager: Arc<LevelManager>,
        scheduler: Arc<Scheduler>,
        music: Arc<MusicController>,
        levels: Receiver<LevelEvent>,
        beats: Receiver<BeatEvent>,
    }

    fn fixture(bank: BeatmapBank, window_ms: u64) -> Fixture {
        let config = SchedulerConfig::from_delay(Duration::from_millis(10))
            .with_hit_window(Duration::from_millis(window_ms));
        let scheduler = Arc::new(
            Scheduler::spawn_with_idle_poll(config, Duration::from_millis(20)).unwrap(),
        );
        let playlist: Vec<String> = (0..bank.len()).map(|i| format!("{i}.wav")).collect();
        let music = Arc::new(
            MusicController::spawn(Arc::new(TracingPlayer::new(playlist.clone())), playlist)
                .unwrap(),
        );
        let (beat_tx, beats) = unbounded();
        scheduler.register_observer(Arc::new(ChannelObserver::new(beat_tx)));

        let manager = LevelManager::new(bank, scheduler.clone(), music.clone());
        let (level_tx, levels) = unbounded();
        manager.register_observer(Arc::new(Recorder(level_tx)));
        Fixture {
            manager,
            scheduler,
            music,
            levels,
            beats,
        }
    }

    fn next_level_event(rx: &Receiver<LevelEvent>) -> LevelEvent {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn out_of_range_level_is_rejected() {
        let fx = fixture(BeatmapBank::builtin(), 5_000);
        assert!(fx.manager.load_level(9).is_err());
        assert_eq!(fx.manager.current_level(), 0);
        assert!(fx.levels.try_recv().is_err());
        fx.scheduler.stop();
    }

    #[test]
    fn navigation_wraps_around_the_bank() {
        let fx = fixture(BeatmapBank::builtin(), 5_000);
        fx.manager.load_level(0).unwrap();
        assert_eq!(
            next_level_event(&fx.levels),
            LevelEvent::Changed(0, "Level 1: KOTON".to_string())
        );

        fx.manager.previous_level().unwrap();
        assert_eq!(fx.manager.current_level(), 4);
        assert_eq!(fx.music.current_song(), 4);
        assert_eq!(fx.scheduler.beatmap().id(), 4);

        fx.manager.next_level().unwrap();
        assert_eq!(fx.manager.current_level(), 0);
        fx.scheduler.stop();
    }

    #[test]
    fn pause_button_toggles_music_and_scheduler() {
        let fx = fixture(BeatmapBank::builtin(), 5_000);
        fx.manager.load_level(1).unwrap();

        fx.manager.on_packet(InputPacket::control(ControlButton::PauseToggle));
        assert!(fx.manager.is_paused());
        assert!(fx.music.is_paused());
        assert!(fx.scheduler.is_paused());

        fx.manager.on_packet(InputPacket::control(ControlButton::PauseToggle));
        assert!(!fx.scheduler.is_paused());
        assert!(!fx.music.is_paused());

        let events: Vec<_> = fx.levels.try_iter().collect();
        assert_eq!(
            events[1..],
            [LevelEvent::Paused(true), LevelEvent::Paused(false)]
        );
        fx.scheduler.stop();
    }

    #[test]
    fn loading_a_level_clears_pause() {
        let fx = fixture(BeatmapBank::builtin(), 5_000);
        fx.manager.load_level(0).unwrap();
        fx.manager.toggle_pause();

        fx.manager.load_level(2).unwrap();
        assert!(!fx.manager.is_paused());
        assert!(!fx.scheduler.is_paused());
        assert!(!fx.music.is_paused());
        fx.scheduler.stop();
    }

    #[test]
    fn sequence_end_pauses_music_only() {
        let bank = BeatmapBank::new(
            vec![Beatmap::from_lanes(0, &[2]).unwrap()],
            vec!["Short".to_string()],
        );
        let fx = fixture(bank, 30);
        fx.manager.load_level(0).unwrap();

        loop {
            match next_level_event(&fx.levels) {
                LevelEvent::Ended => break,
                LevelEvent::Changed(..) | LevelEvent::Paused(_) => {}
            }
        }
        assert!(fx.manager.is_paused());
        assert!(fx.music.is_paused());
        assert!(!fx.scheduler.is_paused());

        let events: Vec<_> = fx.beats.try_iter().collect();
        assert!(events.contains(&BeatEvent::SequenceEnd));
        fx.scheduler.stop();
    }
}
