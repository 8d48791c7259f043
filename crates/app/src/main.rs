use std::{
    fs::File,
    io::{self, BufRead, Read},
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Receiver;
use lanebeat_core::{
    pump, AppConfig, BeatEvent, ChannelObserver, ControlButton, Difficulty, GameSession,
    InputPacket, Judgment, LevelObserver, PacketReader, Scoreboard, TracingPlayer,
};
use tracing_subscriber::EnvFilter;

const EVENT_QUEUE_DEPTH: usize = 256;
const LANE_KEYS: [char; 4] = ['k', 'j', 'l', 'i'];

fn main() -> lanebeat_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(session) => run_play(&session),
        Commands::Replay {
            session,
            input,
            gap_ms,
            settle_ms,
        } => run_replay(
            &session,
            &input,
            Duration::from_millis(gap_ms),
            Duration::from_millis(settle_ms),
        ),
        Commands::Difficulties => print_difficulties(),
    }
}

fn run_play(args: &SessionArgs) -> lanebeat_core::Result<()> {
    let config = load_config(args)?;
    let (session, scoreboard, renderer) = open_session(&config)?;

    println!(
        "lanes: {} | u: difficulty | z/x: previous/next level | c: pause | q: quit",
        LANE_KEYS.iter().collect::<String>()
    );

    'input: for line in io::stdin().lock().lines() {
        for key in line?.chars().filter(|c| !c.is_whitespace()) {
            match key_command(key, session.difficulty()) {
                Some(KeyCommand::Packet(packet)) => session.publish(packet),
                Some(KeyCommand::Quit) => break 'input,
                None => tracing::warn!(%key, "unmapped key"),
            }
        }
    }

    close_session(session, &scoreboard, renderer)
}

fn run_replay(
    args: &SessionArgs,
    input: &Path,
    gap: Duration,
    settle: Duration,
) -> lanebeat_core::Result<()> {
    let config = load_config(args)?;
    let (session, scoreboard, renderer) = open_session(&config)?;

    tracing::info!(input = %input.display(), ?gap, "replaying packets");
    let mut reader = PacketReader::new(Paced {
        inner: File::open(input)?,
        gap,
    });
    let running = AtomicBool::new(true);
    let published = pump(&mut reader, session.hub(), &running, thread::yield_now)?;
    tracing::info!(published, "replay finished");

    thread::sleep(settle);
    close_session(session, &scoreboard, renderer)
}

fn print_difficulties() -> lanebeat_core::Result<()> {
    let profiles = Difficulty::ALL.map(Difficulty::profile);
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

fn open_session(
    config: &AppConfig,
) -> lanebeat_core::Result<(GameSession, Arc<Scoreboard>, JoinHandle<()>)> {
    let player = Arc::new(TracingPlayer::new(config.playlist.clone()));
    let session = GameSession::new(config, player)?;

    let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
    session.register_beat_observer(Arc::new(ChannelObserver::new(tx)));
    let scoreboard = Arc::new(Scoreboard::new());
    session.register_beat_observer(scoreboard.clone());
    session.register_level_observer(Arc::new(ConsoleLevels));

    let renderer = thread::Builder::new()
        .name("event-render".to_string())
        .spawn(move || render_events(&rx))?;

    session.begin()?;
    Ok((session, scoreboard, renderer))
}

fn close_session(
    session: GameSession,
    scoreboard: &Scoreboard,
    renderer: JoinHandle<()>,
) -> lanebeat_core::Result<()> {
    let player = session.player_name().to_string();
    session.shutdown();
    // Dropping the session drops the channel sender and ends the renderer.
    drop(session);
    if renderer.join().is_err() {
        tracing::error!("event renderer panicked");
    }

    let summary = scoreboard.summary();
    println!("{player}: {}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn render_events(rx: &Receiver<BeatEvent>) {
    for event in rx.iter() {
        match event {
            BeatEvent::BeatActivated { lane } => {
                println!("  >> lane {lane} [{}]", lane_key(lane));
            }
            BeatEvent::HitResult { lane, judgment } => {
                let mark = match judgment {
                    Judgment::Good => "+",
                    Judgment::WrongLane => "x",
                    Judgment::MissTimeout => "-",
                };
                println!("  {mark} lane {lane}: {judgment}");
            }
            BeatEvent::SequenceEnd => println!("  == level complete, press x for the next one"),
            BeatEvent::BeatmapChanged { message } => println!("  {message}"),
            BeatEvent::BeatmapIndexChanged { .. } => {}
        }
    }
}

struct ConsoleLevels;

impl LevelObserver for ConsoleLevels {
    fn on_level_changed(&self, _index: usize, name: &str) {
        println!("== {name}");
    }

    fn on_pause_state_changed(&self, paused: bool) {
        println!("{}", if paused { "== paused" } else { "== playing" });
    }
}

enum KeyCommand {
    Packet(InputPacket),
    Quit,
}

fn key_command(key: char, current: Difficulty) -> Option<KeyCommand> {
    let key = key.to_ascii_lowercase();
    if let Some(lane) = LANE_KEYS.iter().position(|&k| k == key) {
        return Some(KeyCommand::Packet(InputPacket::lane_hit(lane as u8)));
    }
    let packet = match key {
        'u' => InputPacket::difficulty(current.cycle()),
        'z' => InputPacket::control(ControlButton::Previous),
        'x' => InputPacket::control(ControlButton::Next),
        'c' => InputPacket::control(ControlButton::PauseToggle),
        'q' => return Some(KeyCommand::Quit),
        _ => return None,
    };
    Some(KeyCommand::Packet(packet))
}

fn lane_key(lane: u8) -> char {
    LANE_KEYS.get(usize::from(lane)).copied().unwrap_or('?')
}

fn load_config(args: &SessionArgs) -> lanebeat_core::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(difficulty) = args.difficulty {
        config.difficulty = difficulty;
    }
    if let Some(level) = args.level {
        config.start_level = level;
    }
    if let Some(name) = &args.name {
        config.player_name = name.clone();
    }
    Ok(config)
}

/// Delays every read by `gap`, so a recorded byte stream plays back at a
/// human pace.
struct Paced<R> {
    inner: R,
    gap: Duration,
}

impl<R: Read> Read for Paced<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.gap);
        self.inner.read(buf)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Four-lane rhythm game", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// easy, medium or hard.
    #[arg(short, long)]
    difficulty: Option<Difficulty>,
    /// Zero-based level to start on.
    #[arg(short, long)]
    level: Option<usize>,
    /// Player name shown in the summary.
    #[arg(short, long)]
    name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play from the keyboard; one or more keys per line on stdin.
    Play(SessionArgs),
    /// Stream raw packet bytes from a file into a session.
    Replay {
        #[command(flatten)]
        session: SessionArgs,
        /// File of raw packet bytes.
        input: PathBuf,
        /// Delay before each byte, in milliseconds.
        #[arg(long, default_value_t = 400)]
        gap_ms: u64,
        /// Time to keep the session alive after the last byte.
        #[arg(long, default_value_t = 1000)]
        settle_ms: u64,
    },
    /// Print the difficulty table as JSON.
    Difficulties,
}

#[cfg(test)]
mod tests {
    use lanebeat_core::{LaneHit, SourceId};

    use super::*;

    fn packet(key: char) -> InputPacket {
        match key_command(key, Difficulty::Medium) {
            Some(KeyCommand::Packet(packet)) => packet,
            _ => panic!("`{key}` is not a packet key"),
        }
    }

    #[test]
    fn lane_keys_map_to_lane_hits() {
        for (lane, key) in LANE_KEYS.iter().enumerate() {
            assert_eq!(LaneHit::decode(packet(*key)), Some(LaneHit::new(lane as u8)));
        }
        assert_eq!(LaneHit::decode(packet('K')), Some(LaneHit::new(0)));
    }

    #[test]
    fn control_keys_map_to_buttons() {
        assert_eq!(ControlButton::decode(packet('z')), Some(ControlButton::Previous));
        assert_eq!(ControlButton::decode(packet('x')), Some(ControlButton::Next));
        assert_eq!(ControlButton::decode(packet('c')), Some(ControlButton::PauseToggle));
        assert!(matches!(key_command('q', Difficulty::Easy), Some(KeyCommand::Quit)));
        assert!(key_command('?', Difficulty::Easy).is_none());
    }

    #[test]
    fn difficulty_key_cycles_from_current() {
        let packet = packet('u');
        assert_eq!(packet.source, SourceId::Tempo);
        assert_eq!(Difficulty::from_level(packet.payload), Some(Difficulty::Hard));
    }

    #[test]
    fn cli_parses_replay_flags() {
        let cli = Cli::try_parse_from([
            "lanebeat", "replay", "--difficulty", "hard", "--gap-ms", "50", "taps.bin",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay { session, gap_ms, .. } => {
                assert_eq!(session.difficulty, Some(Difficulty::Hard));
                assert_eq!(gap_ms, 50);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
