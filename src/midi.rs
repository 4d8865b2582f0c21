//! MIDI transport: midir ports, a writer thread and two bounded queues.
//!
//! The session only ever sees whole SysEx messages through [`Link`]. Inbound
//! bytes are framed in the midir callback and pushed onto one queue; outbound
//! messages go onto the other and are written by a dedicated thread.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

use crate::APP_NAME;

/// Messages each queue can hold.
pub const QUEUE_CAPACITY: usize = 256;
/// Longest SysEx message accepted from the device.
const MAX_MESSAGE_LEN: usize = 4096;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("outbound MIDI queue is full")]
    QueueFull,
    #[error("link is closed")]
    Closed,
}

/// A byte-level SysEx transport.
pub trait Link {
    /// Queues one complete message for sending.
    fn send(&mut self, message: Vec<u8>) -> Result<(), LinkError>;
    /// Returns the next complete message received, if any.
    fn receive(&mut self) -> Option<Vec<u8>>;
}

/// Reassembles SysEx messages from arbitrary chunks of MIDI bytes. Anything
/// that isn't SysEx is dropped.
#[derive(Debug, Default)]
pub struct SysexFramer {
    buf: Vec<u8>,
    in_sysex: bool,
}

impl SysexFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_incoming(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut ret = vec![];
        for &b in bytes {
            match b {
                0xf0 => {
                    if self.in_sysex {
                        warn!("unterminated SysEx dropped ({} bytes)", self.buf.len());
                    }
                    self.buf.clear();
                    self.buf.push(b);
                    self.in_sysex = true;
                }
                0xf7 if self.in_sysex => {
                    self.buf.push(b);
                    ret.push(std::mem::take(&mut self.buf));
                    self.in_sysex = false;
                }
                // realtime messages may appear anywhere
                0xf8..=0xff => (),
                0x80..=0xf7 => {
                    if self.in_sysex {
                        warn!("SysEx interrupted by status byte {b:#04x}");
                        self.buf.clear();
                        self.in_sysex = false;
                    }
                }
                _ => if self.in_sysex {
                    if self.buf.len() >= MAX_MESSAGE_LEN {
                        warn!("SysEx longer than {MAX_MESSAGE_LEN} bytes dropped");
                        self.buf.clear();
                        self.in_sysex = false;
                    } else {
                        self.buf.push(b);
                    }
                }
            }
        }
        ret
    }
}

/// Lists the names of available MIDI inputs.
pub fn input_names() -> Vec<String> {
    match MidiInput::new(&format!("{APP_NAME} port list")) {
        Ok(input) => input.ports().iter()
            .map(|p| input.port_name(p).unwrap_or(String::from("(unknown)")))
            .collect(),
        Err(e) => {
            error!("{e}");
            Vec::new()
        }
    }
}

/// Lists the names of available MIDI outputs.
pub fn output_names() -> Vec<String> {
    match MidiOutput::new(&format!("{APP_NAME} port list")) {
        Ok(output) => output.ports().iter()
            .map(|p| output.port_name(p).unwrap_or(String::from("(unknown)")))
            .collect(),
        Err(e) => {
            error!("{e}");
            Vec::new()
        }
    }
}

/// Picks the port called `selection`, or the first port if there's no
/// selection.
fn select<P: Clone>(ports: &[P], name: impl Fn(&P) -> Option<String>,
    selection: Option<&str>) -> Result<P, Box<dyn Error>> {
    match selection {
        Some(selection) => ports.iter()
            .find(|p| name(p).as_deref() == Some(selection))
            .cloned()
            .ok_or_else(|| format!("MIDI port not found: {selection}").into()),
        None => ports.first().cloned().ok_or_else(|| "no MIDI ports available".into()),
    }
}

/// A pair of open MIDI ports.
pub struct MidiLink {
    _input: MidiInputConnection<(Producer<Vec<u8>>, SysexFramer)>,
    outbound: Producer<Vec<u8>>,
    inbound: Consumer<Vec<u8>>,
    running: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl MidiLink {
    /// Connects to the named ports, or the first available ones.
    pub fn open(input: Option<&str>, output: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let mut midi_in = MidiInput::new(&format!("{APP_NAME} input"))?;
        // SysEx is the whole point here
        midi_in.ignore(Ignore::TimeAndActiveSense);
        let midi_out = MidiOutput::new(&format!("{APP_NAME} output"))?;

        let in_port = select(&midi_in.ports(), |p| midi_in.port_name(p).ok(), input)?;
        let out_port = select(&midi_out.ports(), |p| midi_out.port_name(p).ok(), output)?;
        let in_name = midi_in.port_name(&in_port)?;
        let out_name = midi_out.port_name(&out_port)?;

        let (in_tx, in_rx) = RingBuffer::new(QUEUE_CAPACITY);
        let (out_tx, out_rx) = RingBuffer::new(QUEUE_CAPACITY);

        let conn_in = midi_in.connect(
            &in_port,
            APP_NAME,
            move |_, bytes, (tx, framer)| {
                for message in framer.decode_incoming(bytes) {
                    if tx.push(message).is_err() {
                        warn!("inbound MIDI queue full, message dropped");
                    }
                }
            },
            (in_tx, SysexFramer::new()),
        )?;
        let conn_out = midi_out.connect(&out_port, APP_NAME)?;
        info!("connected to MIDI input \"{in_name}\" and output \"{out_name}\"");

        let running = Arc::new(AtomicBool::new(true));
        let writer = spawn_writer(conn_out, out_rx, running.clone());

        Ok(Self {
            _input: conn_in,
            outbound: out_tx,
            inbound: in_rx,
            running,
            writer: Some(writer),
        })
    }
}

fn spawn_writer(mut conn: MidiOutputConnection, mut rx: Consumer<Vec<u8>>,
    running: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            match rx.pop() {
                Ok(message) => {
                    debug!("sending {} bytes", message.len());
                    if let Err(e) = conn.send(&message) {
                        error!("MIDI send failed: {e}");
                    }
                }
                Err(_) => thread::sleep(IDLE_SLEEP),
            }
        }
        conn.close();
    })
}

impl Link for MidiLink {
    fn send(&mut self, message: Vec<u8>) -> Result<(), LinkError> {
        if self.writer.as_ref().map_or(true, |w| w.is_finished()) {
            return Err(LinkError::Closed)
        }
        self.outbound.push(message).map_err(|_| LinkError::QueueFull)
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop().ok()
    }
}

impl Drop for MidiLink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("MIDI writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_whole_messages() {
        let mut f = SysexFramer::new();
        let out = f.decode_incoming(&[0xf0, 0x18, 0x0f, 0x00, 0x55, 0x7f, 0x01, 0x00, 0xf7]);
        assert_eq!(out, vec![vec![0xf0, 0x18, 0x0f, 0x00, 0x55, 0x7f, 0x01, 0x00, 0xf7]]);
        let out = f.decode_incoming(&[0xf0, 1, 0xf7, 0xf0, 2, 0xf7]);
        assert_eq!(out, vec![vec![0xf0, 1, 0xf7], vec![0xf0, 2, 0xf7]]);
    }

    #[test]
    fn test_framer_split_messages() {
        let mut f = SysexFramer::new();
        assert!(f.decode_incoming(&[0xf0, 1, 2]).is_empty());
        assert!(f.decode_incoming(&[3, 0xf8, 4]).is_empty());
        assert_eq!(f.decode_incoming(&[5, 0xf7]), vec![vec![0xf0, 1, 2, 3, 4, 5, 0xf7]]);
    }

    #[test]
    fn test_framer_drops_other_messages() {
        let mut f = SysexFramer::new();
        assert!(f.decode_incoming(&[0x90, 60, 100, 0x80, 60, 0]).is_empty());
        assert!(f.decode_incoming(&[0xf0, 1, 0x90, 60, 100, 0xf7]).is_empty());
        assert!(f.decode_incoming(&[0xf0, 1, 0xf0, 2, 0xf7]) == vec![vec![0xf0, 2, 0xf7]]);
    }

    #[test]
    fn test_framer_length_limit() {
        let mut f = SysexFramer::new();
        let mut long = vec![0xf0];
        long.extend(std::iter::repeat(0x01).take(MAX_MESSAGE_LEN + 10));
        long.push(0xf7);
        assert!(f.decode_incoming(&long).is_empty());
    }

    #[test]
    fn test_select() {
        let ports = vec!["a".to_string(), "b".to_string()];
        let name = |p: &String| Some(p.clone());
        assert_eq!(select(&ports, name, Some("b")).unwrap(), "b");
        assert_eq!(select(&ports, name, None).unwrap(), "a");
        assert!(select(&ports, name, Some("c")).is_err());
        assert!(select(&Vec::<String>::new(), name, None).is_err());
    }
}
