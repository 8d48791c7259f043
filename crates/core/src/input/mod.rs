//! Raw input packets, the subjects that fan them out, and payload decoding.
//!
//! A packet is one byte on the wire: the top two bits name the device that
//! produced it and the low six bits carry the payload. Decoding the payload
//! into lane hits, control buttons and difficulty changes is done here so the
//! scheduler and level manager only ever see typed values.

use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{beatmap::LANE_COUNT, Difficulty, ObserverSet, Result};

const SOURCE_SHIFT: u8 = 6;
const PAYLOAD_MASK: u8 = 0x3F;
const LOW_BITS_MASK: u8 = 0x03;

/// Device that produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Unassigned,
    /// Difficulty / tempo selector.
    Tempo,
    /// Pressure pads.
    Gameplay,
    /// Previous / next / pause buttons.
    SystemControl,
}

impl SourceId {
    pub fn from_bits(bits: u8) -> Self {
        match bits & LOW_BITS_MASK {
            1 => Self::Tempo,
            2 => Self::Gameplay,
            3 => Self::SystemControl,
            _ => Self::Unassigned,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Unassigned => 0,
            Self::Tempo => 1,
            Self::Gameplay => 2,
            Self::SystemControl => 3,
        }
    }
}

/// One decoded wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputPacket {
    pub source: SourceId,
    pub payload: u8,
}

impl InputPacket {
    pub fn new(source: SourceId, payload: u8) -> Self {
        Self {
            source,
            payload: payload & PAYLOAD_MASK,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            source: SourceId::from_bits(byte >> SOURCE_SHIFT),
            payload: byte & PAYLOAD_MASK,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.source.bits() << SOURCE_SHIFT) | (self.payload & PAYLOAD_MASK)
    }

    /// Pad packet for a 0-indexed lane.
    pub fn lane_hit(lane: u8) -> Self {
        Self::new(SourceId::Gameplay, lane)
    }

    pub fn control(button: ControlButton) -> Self {
        Self::new(SourceId::SystemControl, button.code())
    }

    pub fn difficulty(difficulty: Difficulty) -> Self {
        Self::new(SourceId::Tempo, difficulty.level())
    }
}

/// A pad press, decoded from the low two bits of a gameplay payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneHit {
    pub lane: u8,
}

impl LaneHit {
    pub fn new(lane: u8) -> Self {
        Self { lane }
    }

    /// Returns `None` for packets that did not come from the pads.
    pub fn decode(packet: InputPacket) -> Option<Self> {
        if packet.source != SourceId::Gameplay {
            return None;
        }
        let lane = packet.payload & LOW_BITS_MASK;
        debug_assert!(lane < LANE_COUNT);
        Some(Self { lane })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlButton {
    Previous,
    Next,
    PauseToggle,
}

impl ControlButton {
    /// Code 3 is an unassigned button and decodes to `None`, as do packets
    /// from other sources.
    pub fn decode(packet: InputPacket) -> Option<Self> {
        if packet.source != SourceId::SystemControl {
            return None;
        }
        match packet.payload & LOW_BITS_MASK {
            0 => Some(Self::Previous),
            1 => Some(Self::Next),
            2 => Some(Self::PauseToggle),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Previous => 0,
            Self::Next => 1,
            Self::PauseToggle => 2,
        }
    }
}

/// Difficulty requested by the tempo selector, `None` for payloads outside
/// `1..=3` or packets from other sources.
pub fn decode_difficulty(packet: InputPacket) -> Option<Difficulty> {
    if packet.source != SourceId::Tempo {
        return None;
    }
    Difficulty::from_level(packet.payload)
}

/// Receiver side of the packet subscription interface.
pub trait PacketObserver: Send + Sync {
    fn on_packet(&self, packet: InputPacket);
}

/// Root subject that every input transport publishes into.
#[derive(Debug)]
pub struct PacketHub {
    observers: ObserverSet<dyn PacketObserver>,
}

impl PacketHub {
    pub fn new() -> Self {
        Self {
            observers: ObserverSet::new("packet-hub"),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn PacketObserver>) -> bool {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn PacketObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub fn publish(&self, packet: InputPacket) {
        tracing::trace!(source = ?packet.source, payload = packet.payload, "packet received");
        self.observers
            .notify("packet", |observer| observer.on_packet(packet));
    }
}

impl Default for PacketHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketObserver for PacketHub {
    fn on_packet(&self, packet: InputPacket) {
        self.publish(packet);
    }
}

/// Subject that forwards only the packets of a single source.
///
/// Register it on a [`PacketHub`] and attach consumers to it instead of the
/// hub; consumers still check the source themselves.
#[derive(Debug)]
pub struct SourceFilter {
    source: SourceId,
    observers: ObserverSet<dyn PacketObserver>,
}

impl SourceFilter {
    pub fn new(source: SourceId) -> Self {
        let label = match source {
            SourceId::Unassigned => "unassigned-source",
            SourceId::Tempo => "tempo-source",
            SourceId::Gameplay => "gameplay-source",
            SourceId::SystemControl => "system-control-source",
        };
        Self {
            source,
            observers: ObserverSet::new(label),
        }
    }

    /// Creates the filter and subscribes it to `hub`.
    pub fn attach(hub: &PacketHub, source: SourceId) -> Arc<Self> {
        let filter = Arc::new(Self::new(source));
        hub.register_observer(filter.clone());
        filter
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn register_observer(&self, observer: Arc<dyn PacketObserver>) -> bool {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn PacketObserver>) -> bool {
        self.observers.remove(observer)
    }
}

impl PacketObserver for SourceFilter {
    fn on_packet(&self, packet: InputPacket) {
        if packet.source != self.source {
            return;
        }
        self.observers
            .notify("packet", |observer| observer.on_packet(packet));
    }
}

/// Pulls packets off a byte stream.
///
/// `Ok(None)` means no byte is available yet; only genuine transport failures
/// surface as errors. End of stream is reported separately through
/// [`ReadOutcome::Closed`].
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Packet(InputPacket),
    Closed,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_packet(&mut self) -> Result<Option<ReadOutcome>> {
        let mut byte = [0_u8; 1];
        match self.inner.read(&mut byte) {
            Ok(0) => Ok(Some(ReadOutcome::Closed)),
            Ok(_) => Ok(Some(ReadOutcome::Packet(InputPacket::from_byte(byte[0])))),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Drives `reader` until end of stream, a transport error, or `running` is
/// cleared, publishing each packet into `hub`. `on_idle` runs whenever the
/// reader reports that no data is available yet.
///
/// Returns the number of packets published.
pub fn pump<R, F>(
    reader: &mut PacketReader<R>,
    hub: &PacketHub,
    running: &AtomicBool,
    mut on_idle: F,
) -> Result<usize>
where
    R: Read,
    F: FnMut(),
{
    let mut published = 0;
    while running.load(Ordering::Acquire) {
        match reader.read_packet() {
            Ok(Some(ReadOutcome::Packet(packet))) => {
                hub.publish(packet);
                published += 1;
            }
            Ok(Some(ReadOutcome::Closed)) => {
                tracing::info!(published, "input stream closed");
                break;
            }
            Ok(None) => on_idle(),
            Err(err) => {
                tracing::error!(error = %err, published, "input transport failed");
                return Err(err);
            }
        }
    }
    Ok(published)
}
