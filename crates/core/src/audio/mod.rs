use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{difficulty::tempo_factor, Result};

/// Largest tempo change applied per smoothing tick.
pub const TEMPO_SMOOTHING_STEP: f32 = 0.05;
pub const TEMPO_UPDATE_INTERVAL: Duration = Duration::from_millis(50);

/// Playback backend. Commands are fire-and-forget.
///
/// Implementations are called with the controller's state lock held and must
/// not call back into the [`MusicController`].
pub trait MusicPlayer: Send + Sync {
    fn play(&self, song: usize);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    /// `1.0` is normal speed, `1.5` is 50% faster.
    fn set_tempo(&self, factor: f32);
}

/// Player that only logs the commands it receives.
#[derive(Debug, Default, Clone)]
pub struct TracingPlayer {
    playlist: Vec<String>,
}

impl TracingPlayer {
    pub fn new(playlist: Vec<String>) -> Self {
        Self { playlist }
    }
}

impl MusicPlayer for TracingPlayer {
    fn play(&self, song: usize) {
        let track = self.playlist.get(song).map(String::as_str).unwrap_or("<unknown>");
        tracing::info!(song, track, "play");
    }

    fn pause(&self) {
        tracing::info!("pause playback");
    }

    fn resume(&self) {
        tracing::info!("resume playback");
    }

    fn stop(&self) {
        tracing::info!("stop playback");
    }

    fn set_tempo(&self, factor: f32) {
        tracing::debug!(factor, "set tempo");
    }
}

#[derive(Debug)]
struct PlaybackState {
    current_song: usize,
    paused: bool,
    target_tempo: f32,
    current_tempo: f32,
    running: bool,
}

struct Shared {
    player: Arc<dyn MusicPlayer>,
    playlist: Vec<String>,
    state: Mutex<PlaybackState>,
    wake: Condvar,
    interval: Duration,
}

/// High level playback façade: song selection, play/pause state and a
/// background loop that eases the tempo toward its target.
pub struct MusicController {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MusicController {
    pub fn spawn(player: Arc<dyn MusicPlayer>, playlist: Vec<String>) -> Result<Self> {
        Self::spawn_with_interval(player, playlist, TEMPO_UPDATE_INTERVAL)
    }

    pub fn spawn_with_interval(
        player: Arc<dyn MusicPlayer>,
        playlist: Vec<String>,
        interval: Duration,
    ) -> Result<Self> {
        if playlist.is_empty() {
            tracing::warn!("no songs configured");
        }
        let shared = Arc::new(Shared {
            player,
            playlist,
            state: Mutex::new(PlaybackState {
                current_song: 0,
                paused: false,
                target_tempo: 1.0,
                current_tempo: 1.0,
                running: true,
            }),
            wake: Condvar::new(),
            interval,
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("tempo-smoother".to_string())
            .spawn(move || smooth_loop(&worker_shared))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn playlist(&self) -> &[String] {
        &self.shared.playlist
    }

    /// Starts `index` from the beginning at the current tempo. Invalid indices
    /// are logged and ignored.
    pub fn start_song(&self, index: usize) -> bool {
        if index >= self.shared.playlist.len() {
            tracing::warn!(index, songs = self.shared.playlist.len(), "invalid song index");
            return false;
        }
        let mut state = self.shared.state.lock();
        state.current_song = index;
        state.paused = false;
        tracing::info!(song = index, "starting song");
        self.shared.player.play(index);
        self.shared.player.set_tempo(state.current_tempo);
        true
    }

    pub fn next_song(&self) -> bool {
        let len = self.shared.playlist.len();
        if len == 0 {
            return false;
        }
        let next = (self.current_song() + 1) % len;
        self.start_song(next)
    }

    pub fn previous_song(&self) -> bool {
        let len = self.shared.playlist.len();
        if len == 0 {
            return false;
        }
        let previous = (self.current_song() % len + len - 1) % len;
        self.start_song(previous)
    }

    /// Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.paused {
            return false;
        }
        state.paused = true;
        tracing::info!(song = state.current_song, "pausing song");
        self.shared.player.pause();
        true
    }

    /// Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        tracing::info!(song = state.current_song, "resuming song");
        self.shared.player.resume();
        true
    }

    /// Flips between playing and paused, returning the new paused state.
    pub fn toggle_play_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    /// Sets the target tempo from a difficulty tempo step; the smoothing loop
    /// eases toward it.
    pub fn set_tempo_step(&self, step: i8) {
        self.set_target_tempo(tempo_factor(step));
    }

    pub fn set_target_tempo(&self, factor: f32) {
        let mut state = self.shared.state.lock();
        state.target_tempo = factor;
        tracing::info!(target = factor, current = state.current_tempo, "target tempo set");
    }

    pub fn current_song(&self) -> usize {
        self.shared.state.lock().current_song
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn current_tempo(&self) -> f32 {
        self.shared.state.lock().current_tempo
    }

    pub fn target_tempo(&self) -> f32 {
        self.shared.state.lock().target_tempo
    }

    /// Ends the smoothing loop and stops playback.
    pub fn stop(&self) {
        self.shared.state.lock().running = false;
        self.shared.wake.notify_all();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("tempo smoothing thread panicked");
            }
        }
    }
}

impl Drop for MusicController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MusicController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicController")
            .field("playlist", &self.shared.playlist.len())
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

/// Next tempo on the way from `current` to `target`, or `None` once there.
pub(crate) fn smooth_step(current: f32, target: f32) -> Option<f32> {
    let diff = target - current;
    if diff.abs() <= TEMPO_SMOOTHING_STEP {
        return (diff != 0.0).then_some(target);
    }
    Some(current + TEMPO_SMOOTHING_STEP.copysign(diff))
}

fn smooth_loop(shared: &Shared) {
    tracing::debug!("tempo smoothing started");
    let mut state = shared.state.lock();
    while state.running {
        if let Some(next) = smooth_step(state.current_tempo, state.target_tempo) {
            state.current_tempo = next;
            shared.player.set_tempo(next);
            tracing::debug!(current = next, target = state.target_tempo, "tempo adjusted");
        }
        shared.wake.wait_for(&mut state, shared.interval);
    }
    drop(state);
    shared.player.stop();
    tracing::debug!("tempo smoothing stopped");
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Play(usize),
        Pause,
        Resume,
        Stop,
        Tempo(f32),
    }

    #[derive(Default)]
    struct RecordingPlayer(Mutex<Vec<Command>>);

    impl RecordingPlayer {
        fn commands(&self) -> Vec<Command> {
            self.0.lock().clone()
        }
    }

    impl MusicPlayer for RecordingPlayer {
        fn play(&self, song: usize) {
            self.0.lock().push(Command::Play(song));
        }
        fn pause(&self) {
            self.0.lock().push(Command::Pause);
        }
        fn resume(&self) {
            self.0.lock().push(Command::Resume);
        }
        fn stop(&self) {
            self.0.lock().push(Command::Stop);
        }
        fn set_tempo(&self, factor: f32) {
            self.0.lock().push(Command::Tempo(factor));
        }
    }

    fn playlist(len: usize) -> Vec<String> {
        (0..len).map(|i| format!("song-{i}.wav")).collect()
    }

    #[test]
    fn smoothing_converges_without_overshoot() {
        let mut current = 1.0_f32;
        let mut steps = 0;
        while let Some(next) = smooth_step(current, 1.13) {
            current = next;
            steps += 1;
            assert!(current <= 1.13 + f32::EPSILON);
        }
        assert_relative_eq!(current, 1.13);
        assert_eq!(steps, 3);
        assert_eq!(smooth_step(0.8, 0.8), None);
    }

    #[test]
    fn song_navigation_wraps_and_skips_invalid() {
        let player = Arc::new(RecordingPlayer::default());
        let music = MusicController::spawn_with_interval(
            player.clone(),
            playlist(3),
            Duration::from_secs(60),
        )
        .unwrap();

        assert!(!music.start_song(7));
        assert!(music.previous_song());
        assert_eq!(music.current_song(), 2);
        assert!(music.next_song());
        assert_eq!(music.current_song(), 0);

        music.stop();
        let commands = player.commands();
        assert_eq!(commands[0], Command::Play(2));
        assert_eq!(commands[1], Command::Tempo(1.0));
        assert_eq!(commands[2], Command::Play(0));
        assert_eq!(commands.last(), Some(&Command::Stop));
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let player = Arc::new(RecordingPlayer::default());
        let music =
            MusicController::spawn_with_interval(player.clone(), playlist(1), Duration::from_secs(60))
                .unwrap();

        assert!(music.pause());
        assert!(!music.pause());
        assert!(!music.toggle_play_pause());
        assert!(!music.resume());
        assert!(music.toggle_play_pause());
        drop(music);

        let pauses = player
            .commands()
            .into_iter()
            .filter(|command| *command == Command::Pause)
            .count();
        assert_eq!(pauses, 2);
    }

    #[test]
    fn smoothing_loop_reaches_target() {
        let player = Arc::new(RecordingPlayer::default());
        let music =
            MusicController::spawn_with_interval(player.clone(), playlist(1), Duration::from_millis(2))
                .unwrap();
        music.set_tempo_step(3);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while music.current_tempo() != music.target_tempo() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_relative_eq!(music.current_tempo(), 1.3, epsilon = 1e-6);
        assert!(player.commands().contains(&Command::Tempo(music.target_tempo())));
    }
}
