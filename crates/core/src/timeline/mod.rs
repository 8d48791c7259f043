//! Beat scheduler: the control loop that walks a beatmap on a wall-clock
//! cadence and the judge that races incoming hits against each beat's
//! deadline.
//!
//! All mutable scheduling state (the beatmap, the timing config and the
//! active beat) lives behind one mutex paired with one condition variable.
//! The control loop sleeps on that condition variable for every kind of wait:
//! beat deadlines, inter-beat delays, pauses and idling. Anything that changes
//! what the loop should be doing signals it.
//!
//! Observer notifications are serialized through a separate reentrant
//! emission lock, and the loop re-checks the beatmap generation while holding
//! it. A beatmap swap therefore can never interleave with a notification for
//! a beat of the previous beatmap.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use serde::{Deserialize, Serialize};

use crate::{
    difficulty::hit_window_for,
    input::{InputPacket, LaneHit, PacketObserver},
    judge::judge_hit,
    Beat, BeatObserver, Beatmap, Difficulty, Judgment, ObserverSet, Result,
};

/// How long the loop sleeps between checks while no beatmap is loaded.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(1);

/// Timing knobs read by the control loop at the start of every beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub inter_beat_delay: Duration,
    pub hit_window: Duration,
    pub paused: bool,
}

impl SchedulerConfig {
    /// Config whose hit window is derived from `inter_beat_delay`.
    pub fn from_delay(inter_beat_delay: Duration) -> Self {
        Self {
            inter_beat_delay,
            hit_window: hit_window_for(inter_beat_delay),
            paused: false,
        }
    }

    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        Self::from_delay(difficulty.profile().inter_beat_delay)
    }

    pub fn with_hit_window(mut self, hit_window: Duration) -> Self {
        self.hit_window = hit_window;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::for_difficulty(Difficulty::default())
    }
}

/// The beat currently presented to the player.
///
/// Open while `resolved` is false. A closed beat without a judgment was
/// withdrawn by a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveBeat {
    pub beat: Beat,
    pub index: usize,
    pub activated_at: Instant,
    pub deadline: Instant,
    pub resolved: bool,
    pub judgment: Option<Judgment>,
}

impl ActiveBeat {
    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}

struct State {
    beatmap: Beatmap,
    /// Bumped on every beatmap swap; a sequence in flight restarts when it
    /// no longer matches.
    generation: u64,
    config: SchedulerConfig,
    active: Option<ActiveBeat>,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    emission: ReentrantMutex<()>,
    observers: ObserverSet<dyn BeatObserver>,
    idle_poll: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceOutcome {
    Completed,
    Restarted,
    Stopped,
}

/// Handle to a running beat scheduler.
///
/// The control thread starts in [`Scheduler::spawn`] and lives until
/// [`Scheduler::stop`] or drop, idling between sequences.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn spawn(config: SchedulerConfig) -> Result<Self> {
        Self::spawn_with_idle_poll(config, DEFAULT_IDLE_POLL)
    }

    pub fn spawn_with_idle_poll(config: SchedulerConfig, idle_poll: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                beatmap: Beatmap::empty(0),
                generation: 0,
                config,
                active: None,
                running: true,
            }),
            wake: Condvar::new(),
            emission: ReentrantMutex::new(()),
            observers: ObserverSet::new("beat-scheduler"),
            idle_poll,
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("beat-scheduler".to_string())
            .spawn(move || run(&worker_shared))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn register_observer(&self, observer: Arc<dyn BeatObserver>) -> bool {
        self.shared.observers.register(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn BeatObserver>) -> bool {
        self.shared.observers.remove(observer)
    }

    /// Replaces the beatmap and restarts the sequence from its first beat.
    ///
    /// An open beat of the previous beatmap is abandoned without a judgment.
    /// Once this returns, no beat of the previous beatmap is judged or
    /// announced.
    pub fn set_beatmap(&self, beatmap: Beatmap) {
        let _emission = self.shared.emission.lock();
        let id = beatmap.id();
        let beats = beatmap.len();
        {
            let mut state = self.shared.state.lock();
            if let Some(active) = state.active.take().filter(ActiveBeat::is_open) {
                tracing::info!(index = active.index, "abandoning open beat for new beatmap");
            }
            state.beatmap = beatmap;
            state.generation = state.generation.wrapping_add(1);
        }
        self.shared.wake.notify_all();
        tracing::info!(beatmap = id, beats, "beatmap set");

        self.shared
            .observers
            .notify("beatmap_index_changed", |o| o.on_beatmap_index_changed(id));
        let message = format!("Beatmap changed to #{id}");
        self.shared
            .observers
            .notify("beatmap_changed", |o| o.on_beatmap_changed(&message));
    }

    /// Updates the cadence and re-derives the hit window. An already open beat
    /// keeps its deadline.
    pub fn set_inter_beat_delay(&self, delay: Duration) {
        let mut state = self.shared.state.lock();
        state.config.inter_beat_delay = delay;
        state.config.hit_window = hit_window_for(delay);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            hit_window_ms = state.config.hit_window.as_millis() as u64,
            "inter-beat delay set"
        );
    }

    pub fn set_hit_window(&self, hit_window: Duration) {
        let mut state = self.shared.state.lock();
        state.config.hit_window = hit_window;
        tracing::info!(hit_window_ms = hit_window.as_millis() as u64, "hit window set");
    }

    /// Halts cadence advancement. An open beat is withdrawn without a
    /// judgment and presented again after [`Scheduler::resume`].
    ///
    /// Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.config.paused {
                return false;
            }
            state.config.paused = true;
            if let Some(active) = state.active.as_mut().filter(|active| active.is_open()) {
                active.resolved = true;
                active.judgment = None;
            }
        }
        self.shared.wake.notify_all();
        tracing::info!("scheduler paused");
        true
    }

    /// Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        {
            let mut state = self.shared.state.lock();
            if !state.config.paused {
                return false;
            }
            state.config.paused = false;
        }
        self.shared.wake.notify_all();
        tracing::info!("scheduler resumed");
        true
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().config.paused
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn config(&self) -> SchedulerConfig {
        self.shared.state.lock().config
    }

    pub fn beatmap(&self) -> Beatmap {
        self.shared.state.lock().beatmap.clone()
    }

    pub fn active_beat(&self) -> Option<ActiveBeat> {
        self.shared.state.lock().active
    }

    /// Judges a pad hit against the open beat.
    ///
    /// Returns the judgment if this hit closed the beat, `None` for stray hits
    /// and hits while paused. The hit-result notification itself is emitted by
    /// the control loop.
    pub fn ingest(&self, hit: LaneHit) -> Option<Judgment> {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        if state.config.paused {
            tracing::debug!(lane = hit.lane, "hit ignored while paused");
            return None;
        }
        let Some(active) = state.active.as_mut().filter(|active| active.is_open()) else {
            tracing::debug!(lane = hit.lane, "stray hit, no open beat");
            return None;
        };

        let judgment = judge_hit(active.beat.lane(), hit.lane, now, active.deadline);
        active.resolved = true;
        active.judgment = Some(judgment);
        let index = active.index;
        let expected = active.beat.lane();
        let delta = now.saturating_duration_since(active.activated_at);
        drop(state);

        self.shared.wake.notify_all();
        tracing::info!(
            index,
            expected,
            lane = hit.lane,
            delta_ms = delta.as_millis() as u64,
            %judgment,
            "hit judged"
        );
        Some(judgment)
    }

    /// Stops the control thread and waits for it to exit. Safe to call more
    /// than once and from an observer callback.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
        }
        self.shared.wake.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }
}

impl PacketObserver for Scheduler {
    fn on_packet(&self, packet: InputPacket) {
        match LaneHit::decode(packet) {
            Some(hit) => {
                self.ingest(hit);
            }
            None => tracing::debug!(source = ?packet.source, "ignoring non-gameplay packet"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("beatmap", &state.beatmap.id())
            .field("config", &state.config)
            .field("active", &state.active)
            .field("running", &state.running)
            .finish()
    }
}

fn run(shared: &Shared) {
    tracing::info!("scheduler thread started");
    let mut state = shared.state.lock();
    let mut idle_logged = false;

    while state.running {
        if state.config.paused {
            shared.wake.wait(&mut state);
            continue;
        }
        if state.beatmap.is_empty() {
            if !idle_logged {
                tracing::info!("no beatmap loaded, idling");
                idle_logged = true;
            }
            shared.wake.wait_for(&mut state, shared.idle_poll);
            continue;
        }
        idle_logged = false;

        let beatmap = state.beatmap.clone();
        let generation = state.generation;
        tracing::info!(beatmap = beatmap.id(), beats = beatmap.len(), "starting sequence");

        match play_sequence(shared, &mut state, &beatmap, generation) {
            SequenceOutcome::Completed => {
                state.active = None;
                state.beatmap = Beatmap::empty(beatmap.id());
                tracing::info!(beatmap = beatmap.id(), "sequence complete");
                emit(shared, &mut state, generation, "sequence_end", |o| {
                    o.on_sequence_end()
                });
            }
            SequenceOutcome::Restarted => {
                tracing::debug!(beatmap = beatmap.id(), "sequence interrupted by beatmap change");
            }
            SequenceOutcome::Stopped => break,
        }
    }

    state.active = None;
    tracing::info!("scheduler thread stopped");
}

fn play_sequence(
    shared: &Shared,
    state: &mut MutexGuard<'_, State>,
    beatmap: &Beatmap,
    generation: u64,
) -> SequenceOutcome {
    let mut index = 0;
    while let Some(beat) = beatmap.get(index) {
        while state.config.paused && !interrupted(state, generation) {
            shared.wake.wait(state);
        }
        if let Some(outcome) = check(state, generation) {
            return outcome;
        }

        let activated_at = Instant::now();
        state.active = Some(ActiveBeat {
            beat,
            index,
            activated_at,
            deadline: activated_at + state.config.hit_window,
            resolved: false,
            judgment: None,
        });
        tracing::info!(index, lane = beat.lane(), "beat activated");
        if !emit(shared, state, generation, "beat_activated", |o| {
            o.on_beat_activated(beat.lane())
        }) {
            return check(state, generation).unwrap_or(SequenceOutcome::Restarted);
        }

        let judgment = loop {
            if let Some(outcome) = check(state, generation) {
                return outcome;
            }
            let Some(active) = state.active.as_mut() else {
                return SequenceOutcome::Restarted;
            };
            if active.resolved {
                break active.judgment;
            }
            if Instant::now() >= active.deadline {
                active.resolved = true;
                active.judgment = Some(Judgment::MissTimeout);
                tracing::info!(index, lane = beat.lane(), "beat timed out");
                break active.judgment;
            }
            let deadline = active.deadline;
            shared.wake.wait_until(state, deadline);
        };

        let Some(judgment) = judgment else {
            tracing::info!(index, "beat withdrawn by pause");
            continue;
        };

        if !emit(shared, state, generation, "hit_result", |o| {
            o.on_hit_result(beat.lane(), judgment)
        }) {
            return check(state, generation).unwrap_or(SequenceOutcome::Restarted);
        }

        index += 1;
        if judgment != Judgment::WrongLane && index < beatmap.len() {
            wait_inter_beat_delay(shared, state, generation);
        }
    }

    check(state, generation).unwrap_or(SequenceOutcome::Completed)
}

/// Sleeps the inter-beat delay. Time spent paused does not count toward it:
/// whatever was left when the pause began is slept after resume.
fn wait_inter_beat_delay(shared: &Shared, state: &mut MutexGuard<'_, State>, generation: u64) {
    let mut resume_at = Instant::now() + state.config.inter_beat_delay;
    while !interrupted(state, generation) {
        if state.config.paused {
            let remaining = resume_at.saturating_duration_since(Instant::now());
            while state.config.paused && !interrupted(state, generation) {
                shared.wake.wait(state);
            }
            resume_at = Instant::now() + remaining;
            continue;
        }
        if Instant::now() >= resume_at {
            break;
        }
        shared.wake.wait_until(state, resume_at);
    }
}

fn interrupted(state: &State, generation: u64) -> bool {
    !state.running || state.generation != generation
}

fn check(state: &State, generation: u64) -> Option<SequenceOutcome> {
    if !state.running {
        Some(SequenceOutcome::Stopped)
    } else if state.generation != generation {
        Some(SequenceOutcome::Restarted)
    } else {
        None
    }
}

/// Delivers a notification with the state lock released. Nothing is delivered
/// if the scheduler stopped or the beatmap changed since `generation`.
fn emit<F>(
    shared: &Shared,
    state: &mut MutexGuard<'_, State>,
    generation: u64,
    event: &'static str,
    deliver: F,
) -> bool
where
    F: FnMut(&(dyn BeatObserver + 'static)),
{
    MutexGuard::unlocked(state, || {
        let _emission = shared.emission.lock();
        if interrupted(&shared.state.lock(), generation) {
            return false;
        }
        shared.observers.notify(event, deliver);
        true
    })
}
