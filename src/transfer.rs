//! Packetized dump transfers.
//!
//! An [`Upload`] sends a dump to the device and a [`Download`] receives one.
//! Neither touches the MIDI link: they take decoded replies and return the
//! raw messages to send next, so the session stays in charge of I/O.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::checksum;
use crate::dump::DumpKind;
use crate::idmap::{Variant, HEADER_SIZE, PACKET_BODY, PACKET_OVERHEAD, PACKET_PREAMBLE};
use crate::codec;
use crate::sysex::{Message, ParseError, TransferMode};

/// Resends allowed for one packet before the upload gives up.
pub const MAX_NAK_RETRIES: u32 = 3;
/// Consecutive bad copies of one packet before a download gives up.
pub const MAX_BAD_PACKETS: u32 = 3;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("packet {0} was rejected too many times")]
    TooManyNaks(u16),
    #[error("no reply from device")]
    Timeout,
    #[error("transfer cancelled by device")]
    RemoteCancel,
    #[error("checksum mismatch in packet {0}")]
    Checksum(u16),
    #[error("expected packet {expected}, got {got}")]
    Sequence { expected: u16, got: u16 },
    #[error("unexpected {kind} dump layout: {detail}")]
    Layout { kind: DumpKind, detail: String },
    #[error("bad message from device: {0}")]
    Protocol(ParseError),
    #[error("received dump is unusable: {0}")]
    Unusable(String),
}

/// Progress of a transfer. Packet 0 is the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    SendingHeader,
    SendingBody(u16),
    AwaitingAck(u16),
    /// Awaiting the reply to a resent packet.
    Retrying(u16),
    /// Waiting for packet n from the device.
    Receiving(u16),
    /// Everything acknowledged and EOF sent.
    Done,
    Failed,
    Cancelled,
}

impl State {
    pub fn is_finished(&self) -> bool {
        matches!(self, State::Done | State::Failed | State::Cancelled)
    }
}

/// Sends the messages of one dump.
#[derive(Debug)]
pub struct Upload {
    kind: DumpKind,
    device: u8,
    mode: TransferMode,
    messages: Vec<Vec<u8>>,
    state: State,
    naks: u32,
    timeout: Duration,
    deadline: Option<Instant>,
    error: Option<TransferError>,
}

impl Upload {
    /// `messages` are the dump's wire messages with checksums already in
    /// place, header first.
    pub fn new(kind: DumpKind, device: u8, messages: Vec<Vec<u8>>, mode: TransferMode,
        timeout: Duration) -> Self {
        Self {
            kind,
            device,
            mode,
            messages,
            state: State::Idle,
            naks: 0,
            timeout,
            deadline: None,
            error: None,
        }
    }

    pub fn kind(&self) -> DumpKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn error(&self) -> Option<&TransferError> {
        self.error.as_ref()
    }

    /// Packets acknowledged so far and the total.
    pub fn progress(&self) -> (usize, usize) {
        let done = match self.state {
            State::AwaitingAck(n) | State::Retrying(n) | State::SendingBody(n) => n as usize,
            State::Done => self.messages.len(),
            _ => 0,
        };
        (done, self.messages.len())
    }

    /// Returns the first messages to send.
    pub fn start(&mut self, now: Instant) -> Vec<Vec<u8>> {
        if self.state != State::Idle || self.messages.is_empty() {
            return Vec::new()
        }
        info!("uploading {} in {} packets, {}", self.kind, self.messages.len(), self.mode);
        self.state = State::SendingHeader;
        match self.mode {
            TransferMode::OpenLoop => {
                self.state = State::Done;
                self.messages.clone()
            }
            TransferMode::ClosedLoop => self.send(0, now),
        }
    }

    fn send(&mut self, n: u16, now: Instant) -> Vec<Vec<u8>> {
        self.state = State::AwaitingAck(n);
        self.deadline = Some(now + self.timeout);
        vec![self.messages[n as usize].clone()]
    }

    fn fail(&mut self, e: TransferError) {
        warn!("{} upload failed: {e}", self.kind);
        self.state = State::Failed;
        self.error = Some(e);
        self.deadline = None;
    }

    /// Feeds a reply from the device and returns the messages to send next.
    pub fn handle(&mut self, message: &Message, now: Instant) -> Vec<Vec<u8>> {
        let n = match self.state {
            State::AwaitingAck(n) | State::Retrying(n) => n,
            _ => return Vec::new(),
        };

        match message {
            Message::Ack(p) if *p == n => {
                self.naks = 0;
                let next = n + 1;
                if (next as usize) < self.messages.len() {
                    self.state = State::SendingBody(next);
                    self.send(next, now)
                } else {
                    self.deadline = None;
                    info!("{} upload complete", self.kind);
                    self.state = State::Done;
                    vec![Message::Eof.encode(self.device)]
                }
            }
            Message::Nak(p) if *p == n => {
                self.naks += 1;
                if self.naks > MAX_NAK_RETRIES {
                    self.fail(TransferError::TooManyNaks(n));
                    return Vec::new()
                }
                debug!("resending packet {n} ({}/{MAX_NAK_RETRIES})", self.naks);
                let out = self.send(n, now);
                self.state = State::Retrying(n);
                out
            }
            Message::Ack(p) | Message::Nak(p) => {
                warn!("ignoring reply for packet {p} while waiting for {n}");
                Vec::new()
            }
            Message::Wait => {
                self.deadline = Some(now + self.timeout);
                Vec::new()
            }
            Message::Cancel => {
                self.fail(TransferError::RemoteCancel);
                self.state = State::Cancelled;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Checks the reply watchdog.
    pub fn poll(&mut self, now: Instant) {
        if self.deadline.is_some_and(|d| now >= d) {
            self.fail(TransferError::Timeout);
        }
    }

    /// Abandons the transfer and returns the cancel message for the device.
    pub fn cancel(&mut self) -> Vec<Vec<u8>> {
        if self.state.is_finished() {
            return Vec::new()
        }
        info!("{} upload cancelled", self.kind);
        self.state = State::Cancelled;
        self.deadline = None;
        vec![Message::Cancel.encode(self.device)]
    }
}

/// Receives one dump from the device.
#[derive(Debug)]
pub struct Download {
    kind: DumpKind,
    device: u8,
    mode: TransferMode,
    variant: Option<Variant>,
    buf: Vec<u8>,
    state: State,
    bad: u32,
    timeout: Duration,
    deadline: Option<Instant>,
    error: Option<TransferError>,
}

impl Download {
    pub fn new(kind: DumpKind, device: u8, timeout: Duration) -> Self {
        Self {
            kind,
            device,
            mode: TransferMode::ClosedLoop,
            variant: None,
            buf: Vec::new(),
            state: State::Idle,
            bad: 0,
            timeout,
            deadline: None,
            error: None,
        }
    }

    pub fn kind(&self) -> DumpKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn error(&self) -> Option<&TransferError> {
        self.error.as_ref()
    }

    /// Starts waiting for the first message, normally right after the request
    /// is sent.
    pub fn start(&mut self, now: Instant) {
        self.state = State::Receiving(0);
        self.deadline = Some(now + self.timeout);
    }

    /// The received buffer, once the transfer is done.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        (self.state == State::Done).then(|| std::mem::take(&mut self.buf))
    }

    fn fail(&mut self, e: TransferError) -> Vec<Vec<u8>> {
        warn!("{} download failed: {e}", self.kind);
        self.state = State::Failed;
        self.error = Some(e);
        self.deadline = None;
        Vec::new()
    }

    fn reply(&self, message: Message) -> Vec<Vec<u8>> {
        match self.mode {
            TransferMode::ClosedLoop => vec![message.encode(self.device)],
            TransferMode::OpenLoop => Vec::new(),
        }
    }

    /// Feeds a message from the device and returns the replies to send.
    pub fn handle(&mut self, message: &Message, now: Instant) -> Vec<Vec<u8>> {
        let State::Receiving(n) = self.state else {
            return Vec::new()
        };

        match (self.kind, message) {
            (DumpKind::Preset, Message::PresetHeader { mode, raw }) if n == 0 => {
                self.mode = *mode;
                self.header(raw, now)
            }
            (DumpKind::Preset, Message::PresetData { packet, raw, .. }) if n > 0 => {
                self.packet(*packet, n, raw, now)
            }
            (DumpKind::Setup, Message::SetupDump(raw))
            | (DumpKind::Arp, Message::ArpDump(raw)) if n == 0 => {
                self.single(raw)
            }
            (_, Message::Wait) => {
                self.deadline = Some(now + self.timeout);
                Vec::new()
            }
            (_, Message::Cancel) => {
                self.fail(TransferError::RemoteCancel);
                self.state = State::Cancelled;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn header(&mut self, raw: &[u8], now: Instant) -> Vec<Vec<u8>> {
        if raw.len() != HEADER_SIZE {
            return self.fail(TransferError::Layout {
                kind: self.kind,
                detail: format!("{}-byte header", raw.len()),
            })
        }
        let count = codec::decode_u28(&raw[11..15]) as usize;
        let Some(variant) = Variant::KNOWN.into_iter().find(|v| v.payload_len() == count) else {
            return self.fail(TransferError::Layout {
                kind: self.kind,
                detail: format!("{count} payload bytes"),
            })
        };
        debug!("receiving {variant:?} preset, {}", self.mode);
        self.variant = Some(variant);
        self.buf = raw.to_vec();
        self.state = State::Receiving(1);
        self.deadline = Some(now + self.timeout);
        self.reply(Message::Ack(0))
    }

    fn packet(&mut self, packet: u16, n: u16, raw: &[u8], now: Instant) -> Vec<Vec<u8>> {
        let Some(variant) = self.variant else {
            return Vec::new()
        };
        if n.checked_sub(1) == Some(packet) {
            // our ACK got lost and the device sent the packet again
            return self.reply(Message::Ack(packet))
        }
        if packet != n {
            return self.fail(TransferError::Sequence { expected: n, got: packet })
        }

        let received = self.buf.len() - HEADER_SIZE
            - PACKET_OVERHEAD * (n as usize - 1);
        let expected_len = PACKET_BODY.min(variant.payload_len() - received);
        let body = raw.get(PACKET_PREAMBLE..raw.len().saturating_sub(2)).unwrap_or(&[]);
        let ok = body.len() == expected_len
            && checksum::verify(body, raw[raw.len() - 2]);

        if !ok {
            if self.mode == TransferMode::OpenLoop {
                return self.fail(TransferError::Checksum(n))
            }
            self.bad += 1;
            if self.bad >= MAX_BAD_PACKETS {
                self.fail(TransferError::Checksum(n));
                return vec![Message::Cancel.encode(self.device)]
            }
            debug!("bad packet {n}, requesting it again");
            self.deadline = Some(now + self.timeout);
            return self.reply(Message::Nak(n))
        }

        self.bad = 0;
        self.buf.extend_from_slice(raw);
        let out = self.reply(Message::Ack(n));
        if received + body.len() >= variant.payload_len() {
            info!("{} download complete", self.kind);
            self.state = State::Done;
            self.deadline = None;
        } else {
            self.state = State::Receiving(n + 1);
            self.deadline = Some(now + self.timeout);
        }
        out
    }

    fn single(&mut self, raw: &[u8]) -> Vec<Vec<u8>> {
        if raw.len() < crate::dump::SINGLE_PREAMBLE + 2 {
            return self.fail(TransferError::Layout {
                kind: self.kind,
                detail: format!("{} bytes", raw.len()),
            })
        }
        if crate::dump::single_checksum(raw) != raw[raw.len() - 2] {
            return self.fail(TransferError::Checksum(0))
        }
        info!("{} download complete", self.kind);
        self.buf = raw.to_vec();
        self.state = State::Done;
        self.deadline = None;
        Vec::new()
    }

    pub fn poll(&mut self, now: Instant) {
        if self.deadline.is_some_and(|d| now >= d) {
            self.fail(TransferError::Timeout);
        }
    }

    pub fn cancel(&mut self) -> Vec<Vec<u8>> {
        if self.state.is_finished() {
            return Vec::new()
        }
        info!("{} download cancelled", self.kind);
        self.state = State::Cancelled;
        self.deadline = None;
        vec![Message::Cancel.encode(self.device)]
    }
}
