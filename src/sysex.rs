//! Encoding and parsing of the device's SysEx messages.
//!
//! Vendor messages look like `F0 18 0F <dev> 55 <cmd> ... F7`. Dump messages
//! are kept as raw bytes, since dump buffers store them verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;

pub const SOX: u8 = 0xf0;
pub const EOX: u8 = 0xf7;
pub const MANUFACTURER: u8 = 0x18;
pub const MODEL: u8 = 0x0f;
/// Marks a message as part of the editor protocol.
pub const EDITOR: u8 = 0x55;
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7e;
/// Device id that every unit answers to.
pub const ALL_DEVICES: u8 = 0x7f;

/// Bytes up to and including the command byte.
pub const PREAMBLE_LEN: usize = 6;
pub const DEVICE_ID_OFFSET: usize = 3;
pub const COMMAND_OFFSET: usize = 5;
/// Offset of the byte following the command in dump messages.
pub const MODE_OFFSET: usize = 6;

pub const CMD_PARAM_EDIT: u8 = 0x01;
pub const CMD_HW_CONFIG: u8 = 0x09;
pub const CMD_HW_CONFIG_REQUEST: u8 = 0x0a;
pub const CMD_NAME_REQUEST: u8 = 0x0b;
pub const CMD_NAME: u8 = 0x0c;
pub const CMD_PRESET_DUMP: u8 = 0x10;
pub const CMD_PRESET_REQUEST: u8 = 0x11;
pub const CMD_ARP_DUMP: u8 = 0x18;
pub const CMD_ARP_REQUEST: u8 = 0x19;
pub const CMD_SETUP_DUMP: u8 = 0x1c;
pub const CMD_SETUP_REQUEST: u8 = 0x1d;
pub const CMD_COPY: u8 = 0x20;
pub const CMD_EOF: u8 = 0x7b;
pub const CMD_WAIT: u8 = 0x7c;
pub const CMD_CANCEL: u8 = 0x7d;
pub const CMD_NAK: u8 = 0x7e;
pub const CMD_ACK: u8 = 0x7f;

pub const HEADER_CLOSED: u8 = 0x01;
pub const DATA_CLOSED: u8 = 0x02;
pub const HEADER_OPEN: u8 = 0x03;
pub const DATA_OPEN: u8 = 0x04;
/// Mode byte of single-message dumps (setup, arp).
pub const SINGLE_DUMP: u8 = 0x01;

const NAME_LEN: usize = 16;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message too short ({0} bytes)")]
    TooShort(usize),
    #[error("missing start of exclusive")]
    MissingStart,
    #[error("missing end of exclusive")]
    MissingEnd,
    #[error("message is for another device family")]
    Foreign,
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("unexpected length for command {command:#04x}: {len} bytes")]
    BadLength { command: u8, len: usize },
    #[error("unknown dump mode {0:#04x}")]
    UnknownMode(u8),
    #[error("invalid packet number {0}")]
    BadPacket(i32),
}

/// Whether a transfer waits for acknowledgement of each packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    #[default]
    ClosedLoop,
    OpenLoop,
}

impl TransferMode {
    pub fn header_byte(self) -> u8 {
        match self {
            Self::ClosedLoop => HEADER_CLOSED,
            Self::OpenLoop => HEADER_OPEN,
        }
    }

    pub fn data_byte(self) -> u8 {
        match self {
            Self::ClosedLoop => DATA_CLOSED,
            Self::OpenLoop => DATA_OPEN,
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedLoop => write!(f, "closed loop"),
            Self::OpenLoop => write!(f, "open loop"),
        }
    }
}

/// Object kinds understood by name requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Preset = 1,
    Instrument = 2,
    Arp = 3,
    Setup = 4,
    Riff = 5,
}

impl ObjectKind {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::Preset,
            2 => Self::Instrument,
            3 => Self::Arp,
            4 => Self::Setup,
            5 => Self::Riff,
            _ => return None,
        })
    }
}

/// Device-side copy operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyOp {
    Preset { from: i32, to: i32 },
    Arp { from: i32, to: i32 },
    /// Copies layer `from_layer` of preset `from` over `to_layer` of `to`.
    Layers { from: i32, to: i32, from_layer: u8, to_layer: u8 },
    Setup { from: i32, to: i32 },
}

const COPY_PRESET: u8 = 0x01;
const COPY_ARP: u8 = 0x02;
const COPY_LAYERS: u8 = 0x03;
const COPY_SETUP: u8 = 0x04;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RomInfo {
    pub id: i32,
    pub presets: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HardwareConfig {
    pub user_presets: i32,
    pub roms: Vec<RomInfo>,
}

/// Reply to a universal device inquiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub family: u16,
    pub member: u16,
    pub revision: [u8; 4],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// (id, value) pairs applied in order.
    ParamEdit(Vec<(i32, i32)>),
    HardwareConfig(HardwareConfig),
    HardwareConfigRequest,
    NameRequest { kind: ObjectKind, number: i32, rom: i32 },
    Name { kind: ObjectKind, number: i32, rom: i32, name: String },
    PresetHeader { mode: TransferMode, raw: Vec<u8> },
    PresetData { mode: TransferMode, packet: u16, raw: Vec<u8> },
    PresetRequest { mode: TransferMode, number: i32, rom: i32 },
    ArpDump(Vec<u8>),
    ArpRequest { number: i32, rom: i32 },
    SetupDump(Vec<u8>),
    SetupRequest,
    Copy(CopyOp),
    Eof,
    Wait,
    Cancel,
    Nak(u16),
    Ack(u16),
    DeviceInquiry,
    Identity(Identity),
}

/// A parsed message and the device id it carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed {
    pub device: u8,
    pub message: Message,
}

fn push_pair(v: &mut Vec<u8>, value: i32) {
    let (lsb, msb) = codec::encode(value);
    v.push(lsb);
    v.push(msb);
}

fn pair_at(data: &[u8], i: usize) -> i32 {
    codec::decode(data[i], data[i + 1])
}

/// Packet numbers are never negative, unlike other pairs.
fn packet_at(data: &[u8], i: usize) -> Result<u16, ParseError> {
    let value = pair_at(data, i);
    u16::try_from(value).map_err(|_| ParseError::BadPacket(value))
}

fn vendor(device: u8, command: u8) -> Vec<u8> {
    vec![SOX, MANUFACTURER, MODEL, device, EDITOR, command]
}

/// Rewrites the device id of a vendor message in place.
pub fn set_device(raw: &mut [u8], device: u8) {
    if raw.len() > DEVICE_ID_OFFSET {
        raw[DEVICE_ID_OFFSET] = device & 0x7f;
    }
}

impl Message {
    /// Encodes the message for device `device`.
    pub fn encode(&self, device: u8) -> Vec<u8> {
        let mut v = match self {
            Message::ParamEdit(edits) => {
                let mut v = vendor(device, CMD_PARAM_EDIT);
                v.push(edits.len() as u8 & 0x7f);
                for (id, value) in edits {
                    push_pair(&mut v, *id);
                    push_pair(&mut v, *value);
                }
                v
            }
            Message::HardwareConfig(config) => {
                let mut v = vendor(device, CMD_HW_CONFIG);
                push_pair(&mut v, config.user_presets);
                v.push(config.roms.len() as u8 & 0x7f);
                for rom in &config.roms {
                    push_pair(&mut v, rom.id);
                    push_pair(&mut v, rom.presets);
                }
                v
            }
            Message::HardwareConfigRequest => vendor(device, CMD_HW_CONFIG_REQUEST),
            Message::NameRequest { kind, number, rom } => {
                let mut v = vendor(device, CMD_NAME_REQUEST);
                v.push(*kind as u8);
                push_pair(&mut v, *number);
                push_pair(&mut v, *rom);
                v
            }
            Message::Name { kind, number, rom, name } => {
                let mut v = vendor(device, CMD_NAME);
                v.push(*kind as u8);
                push_pair(&mut v, *number);
                push_pair(&mut v, *rom);
                let mut chars: Vec<u8> = name.bytes().map(|b| b & 0x7f).take(NAME_LEN).collect();
                chars.resize(NAME_LEN, b' ');
                v.extend(chars);
                v
            }
            Message::PresetHeader { raw, .. }
            | Message::PresetData { raw, .. }
            | Message::ArpDump(raw)
            | Message::SetupDump(raw) => {
                let mut raw = raw.clone();
                set_device(&mut raw, device);
                return raw
            }
            Message::PresetRequest { mode, number, rom } => {
                let mut v = vendor(device, CMD_PRESET_REQUEST);
                v.push(match mode {
                    TransferMode::ClosedLoop => 0x00,
                    TransferMode::OpenLoop => 0x01,
                });
                push_pair(&mut v, *number);
                push_pair(&mut v, *rom);
                v
            }
            Message::ArpRequest { number, rom } => {
                let mut v = vendor(device, CMD_ARP_REQUEST);
                push_pair(&mut v, *number);
                push_pair(&mut v, *rom);
                v
            }
            Message::SetupRequest => vendor(device, CMD_SETUP_REQUEST),
            Message::Copy(copy) => {
                let mut v = vendor(device, CMD_COPY);
                match *copy {
                    CopyOp::Preset { from, to } => {
                        v.push(COPY_PRESET);
                        push_pair(&mut v, from);
                        push_pair(&mut v, to);
                    }
                    CopyOp::Arp { from, to } => {
                        v.push(COPY_ARP);
                        push_pair(&mut v, from);
                        push_pair(&mut v, to);
                    }
                    CopyOp::Layers { from, to, from_layer, to_layer } => {
                        v.push(COPY_LAYERS);
                        push_pair(&mut v, from);
                        push_pair(&mut v, to);
                        v.push(from_layer & 0x7f);
                        v.push(to_layer & 0x7f);
                    }
                    CopyOp::Setup { from, to } => {
                        v.push(COPY_SETUP);
                        push_pair(&mut v, from);
                        push_pair(&mut v, to);
                    }
                }
                v
            }
            Message::Eof => vendor(device, CMD_EOF),
            Message::Wait => vendor(device, CMD_WAIT),
            Message::Cancel => vendor(device, CMD_CANCEL),
            Message::Nak(packet) => {
                let mut v = vendor(device, CMD_NAK);
                push_pair(&mut v, *packet as i32);
                v
            }
            Message::Ack(packet) => {
                let mut v = vendor(device, CMD_ACK);
                push_pair(&mut v, *packet as i32);
                v
            }
            Message::DeviceInquiry => vec![SOX, UNIVERSAL_NON_REALTIME, device, 0x06, 0x01],
            Message::Identity(id) => {
                let mut v = vec![SOX, UNIVERSAL_NON_REALTIME, device, 0x06, 0x02,
                    MANUFACTURER, MODEL, 0x00];
                v.push((id.family & 0x7f) as u8);
                v.push((id.family >> 7 & 0x7f) as u8);
                v.push((id.member & 0x7f) as u8);
                v.push((id.member >> 7 & 0x7f) as u8);
                v.extend(id.revision);
                v
            }
        };
        v.push(EOX);
        v
    }

    /// Parses one complete SysEx message.
    pub fn parse(data: &[u8]) -> Result<Parsed, ParseError> {
        if data.len() < 5 {
            return Err(ParseError::TooShort(data.len()))
        }
        if data[0] != SOX {
            return Err(ParseError::MissingStart)
        }
        if data[data.len() - 1] != EOX {
            return Err(ParseError::MissingEnd)
        }

        if data[1] == UNIVERSAL_NON_REALTIME {
            return parse_universal(data)
        }
        if data.len() < PREAMBLE_LEN + 1 {
            return Err(ParseError::TooShort(data.len()))
        }
        if data[1] != MANUFACTURER || data[2] != MODEL || data[4] != EDITOR {
            return Err(ParseError::Foreign)
        }

        let device = data[DEVICE_ID_OFFSET];
        let command = data[COMMAND_OFFSET];
        // payload between the command byte and EOX
        let p = &data[PREAMBLE_LEN..data.len() - 1];
        let bad_len = || ParseError::BadLength { command, len: data.len() };
        let expect = |len: usize| if p.len() == len { Ok(()) } else { Err(bad_len()) };

        let message = match command {
            CMD_PARAM_EDIT => {
                let count = *p.first().ok_or_else(bad_len)? as usize;
                expect(1 + 4 * count)?;
                Message::ParamEdit((0..count)
                    .map(|i| (pair_at(p, 1 + 4 * i), pair_at(p, 3 + 4 * i)))
                    .collect())
            }
            CMD_HW_CONFIG => {
                if p.len() < 3 {
                    return Err(bad_len())
                }
                let count = p[2] as usize;
                expect(3 + 4 * count)?;
                Message::HardwareConfig(HardwareConfig {
                    user_presets: pair_at(p, 0),
                    roms: (0..count)
                        .map(|i| RomInfo {
                            id: pair_at(p, 3 + 4 * i),
                            presets: pair_at(p, 5 + 4 * i),
                        })
                        .collect(),
                })
            }
            CMD_HW_CONFIG_REQUEST => {
                expect(0)?;
                Message::HardwareConfigRequest
            }
            CMD_NAME_REQUEST => {
                expect(5)?;
                Message::NameRequest {
                    kind: ObjectKind::from_byte(p[0]).ok_or(ParseError::UnknownMode(p[0]))?,
                    number: pair_at(p, 1),
                    rom: pair_at(p, 3),
                }
            }
            CMD_NAME => {
                expect(5 + NAME_LEN)?;
                Message::Name {
                    kind: ObjectKind::from_byte(p[0]).ok_or(ParseError::UnknownMode(p[0]))?,
                    number: pair_at(p, 1),
                    rom: pair_at(p, 3),
                    name: ascii(&p[5..]),
                }
            }
            CMD_PRESET_DUMP => {
                let mode = *p.first().ok_or_else(bad_len)?;
                match mode {
                    HEADER_CLOSED | HEADER_OPEN => Message::PresetHeader {
                        mode: if mode == HEADER_CLOSED {
                            TransferMode::ClosedLoop
                        } else {
                            TransferMode::OpenLoop
                        },
                        raw: data.to_vec(),
                    },
                    DATA_CLOSED | DATA_OPEN => {
                        // packet number, at least one body byte, checksum
                        if p.len() < 5 {
                            return Err(bad_len())
                        }
                        Message::PresetData {
                            mode: if mode == DATA_CLOSED {
                                TransferMode::ClosedLoop
                            } else {
                                TransferMode::OpenLoop
                            },
                            packet: packet_at(p, 1)?,
                            raw: data.to_vec(),
                        }
                    }
                    _ => return Err(ParseError::UnknownMode(mode)),
                }
            }
            CMD_PRESET_REQUEST => {
                expect(5)?;
                Message::PresetRequest {
                    mode: if p[0] == 0 { TransferMode::ClosedLoop } else { TransferMode::OpenLoop },
                    number: pair_at(p, 1),
                    rom: pair_at(p, 3),
                }
            }
            CMD_ARP_DUMP => Message::ArpDump(data.to_vec()),
            CMD_ARP_REQUEST => {
                expect(4)?;
                Message::ArpRequest { number: pair_at(p, 0), rom: pair_at(p, 2) }
            }
            CMD_SETUP_DUMP => Message::SetupDump(data.to_vec()),
            CMD_SETUP_REQUEST => {
                expect(0)?;
                Message::SetupRequest
            }
            CMD_COPY => {
                let op = *p.first().ok_or_else(bad_len)?;
                let copy = match op {
                    COPY_LAYERS => {
                        expect(7)?;
                        CopyOp::Layers {
                            from: pair_at(p, 1),
                            to: pair_at(p, 3),
                            from_layer: p[5],
                            to_layer: p[6],
                        }
                    }
                    COPY_PRESET | COPY_ARP | COPY_SETUP => {
                        expect(5)?;
                        let (from, to) = (pair_at(p, 1), pair_at(p, 3));
                        match op {
                            COPY_PRESET => CopyOp::Preset { from, to },
                            COPY_ARP => CopyOp::Arp { from, to },
                            _ => CopyOp::Setup { from, to },
                        }
                    }
                    _ => return Err(ParseError::UnknownMode(op)),
                };
                Message::Copy(copy)
            }
            CMD_EOF => Message::Eof,
            CMD_WAIT => Message::Wait,
            CMD_CANCEL => Message::Cancel,
            CMD_NAK | CMD_ACK => {
                expect(2)?;
                let packet = packet_at(p, 0)?;
                if command == CMD_ACK { Message::Ack(packet) } else { Message::Nak(packet) }
            }
            _ => return Err(ParseError::UnknownCommand(command)),
        };

        Ok(Parsed { device, message })
    }
}

fn parse_universal(data: &[u8]) -> Result<Parsed, ParseError> {
    let device = data[2];
    match data.get(3..5) {
        Some([0x06, 0x01]) => Ok(Parsed { device, message: Message::DeviceInquiry }),
        Some([0x06, 0x02]) => {
            if data.len() != 17 {
                return Err(ParseError::BadLength { command: 0x06, len: data.len() })
            }
            if data[5] != MANUFACTURER {
                return Err(ParseError::Foreign)
            }
            let word = |i: usize| data[i] as u16 | (data[i + 1] as u16) << 7;
            Ok(Parsed {
                device,
                message: Message::Identity(Identity {
                    family: word(8),
                    member: word(10),
                    revision: [data[12], data[13], data[14], data[15]],
                }),
            })
        }
        _ => Err(ParseError::Foreign),
    }
}

/// Reads ASCII name bytes, dropping trailing padding.
pub fn ascii(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|b| match b & 0x7f {
            c @ 0x20..=0x7e => c as char,
            _ => ' ',
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: Message) {
        let bytes = m.encode(0x10);
        assert_eq!(Message::parse(&bytes), Ok(Parsed { device: 0x10, message: m }));
    }

    #[test]
    fn test_round_trip_messages() {
        round_trip(Message::ParamEdit(vec![(898, 2), (1410, -20)]));
        round_trip(Message::HardwareConfig(HardwareConfig {
            user_presets: 512,
            roms: vec![RomInfo { id: 4, presets: 512 }, RomInfo { id: 5, presets: 256 }],
        }));
        round_trip(Message::NameRequest { kind: ObjectKind::Preset, number: 130, rom: 0 });
        round_trip(Message::Name {
            kind: ObjectKind::Arp, number: 3, rom: 4, name: "Pad:Warm Air".to_string(),
        });
        round_trip(Message::PresetRequest { mode: TransferMode::OpenLoop, number: -1, rom: 0 });
        round_trip(Message::Copy(CopyOp::Layers { from: 1, to: 2, from_layer: 0, to_layer: 3 }));
        round_trip(Message::Copy(CopyOp::Setup { from: 0, to: 1 }));
        round_trip(Message::Ack(300));
        round_trip(Message::Nak(7));
        round_trip(Message::Identity(Identity { family: 4, member: 0x0103, revision: *b"0101" }));
        round_trip(Message::DeviceInquiry);
    }

    #[test]
    fn test_param_edit_bytes() {
        let bytes = Message::ParamEdit(vec![(1410, -20)]).encode(0);
        assert_eq!(bytes, vec![0xf0, 0x18, 0x0f, 0x00, 0x55, 0x01, 0x01,
            0x02, 0x0b, 0x6c, 0x7f, 0xf7]);
    }

    #[test]
    fn test_handshake_bytes() {
        assert_eq!(Message::Ack(1).encode(0), vec![0xf0, 0x18, 0x0f, 0x00, 0x55, 0x7f, 1, 0, 0xf7]);
        assert_eq!(Message::Eof.encode(3), vec![0xf0, 0x18, 0x0f, 0x03, 0x55, 0x7b, 0xf7]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Message::parse(&[0xf0, 0xf7]), Err(ParseError::TooShort(2)));
        assert_eq!(Message::parse(&[0x90, 0x18, 0x0f, 0, 0x55, 0x7f, 0xf7]),
            Err(ParseError::MissingStart));
        assert_eq!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x7f, 0]),
            Err(ParseError::MissingEnd));
        assert_eq!(Message::parse(&[0xf0, 0x41, 0x0f, 0, 0x55, 0x7f, 0xf7]),
            Err(ParseError::Foreign));
        assert_eq!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x42, 0xf7]),
            Err(ParseError::UnknownCommand(0x42)));
        assert!(matches!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x7f, 1, 0xf7]),
            Err(ParseError::BadLength { .. })));
        assert!(matches!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x01, 2, 0, 0, 0, 0, 0xf7]),
            Err(ParseError::BadLength { .. })));
    }

    #[test]
    fn test_negative_packet_numbers() {
        assert_eq!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x7f, 0x7f, 0x7f, 0xf7]),
            Err(ParseError::BadPacket(-1)));
        assert_eq!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x7e, 0x00, 0x40, 0xf7]),
            Err(ParseError::BadPacket(-8192)));
        let mut data = vec![0xf0, 0x18, 0x0f, 0, 0x55, 0x10, DATA_CLOSED, 0x7f, 0x7f];
        data.extend([0; 4]);
        data.push(0xf7);
        assert_eq!(Message::parse(&data), Err(ParseError::BadPacket(-1)));
        // the largest positive pair is still a packet number
        assert_eq!(Message::parse(&[0xf0, 0x18, 0x0f, 0, 0x55, 0x7f, 0x7f, 0x3f, 0xf7]),
            Ok(Parsed { device: 0, message: Message::Ack(8191) }));
    }

    #[test]
    fn test_dump_messages_keep_raw_bytes() {
        let raw = vec![0xf0, 0x18, 0x0f, 0x00, 0x55, 0x10, 0x02, 0x01, 0x00, 0x11, 0x22, 0x4c, 0xf7];
        let parsed = Message::parse(&raw).unwrap();
        assert_eq!(parsed.message, Message::PresetData {
            mode: TransferMode::ClosedLoop, packet: 1, raw: raw.clone(),
        });
        let resent = parsed.message.encode(5);
        assert_eq!(resent[DEVICE_ID_OFFSET], 5);
        assert_eq!(resent[4..], raw[4..]);
    }

    #[test]
    fn test_ascii() {
        assert_eq!(ascii(b"Grand Piano     "), "Grand Piano");
        assert_eq!(ascii(&[0x41, 0x00, 0x42]), "A B");
    }
}
