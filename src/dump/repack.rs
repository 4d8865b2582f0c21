//! Preset framing and conversion between hardware variants.
//!
//! Converting goes through the contiguous payload: strip the packet framing,
//! insert or remove the variant-specific blocks, then packetize again with
//! fresh checksums.

use crate::checksum;
use crate::codec;
use crate::idmap::{self, Variant, HEADER_SIZE, PACKET_BODY, PACKET_PREAMBLE, PACKET_SIZE};
use crate::sysex::{self, TransferMode};

/// Payload byte where the extra controller block starts.
const EXTRA_BLOCK_START: usize = 80;
const EXTRA_BLOCK_LEN: usize = 8;
/// Payload byte of the arp post-delay pair, before the extra block shift.
const POST_DELAY_START: usize = 118;

const NUMBER_OFFSET: usize = 7;
const ROM_OFFSET: usize = 9;
const BYTE_COUNT_OFFSET: usize = 11;
const SECTION_COUNT_OFFSET: usize = 15;

/// Builds a preset header message.
pub fn build_header(variant: Variant, device: u8, mode: TransferMode, number: i32, rom: i32)
    -> Vec<u8> {
    let mut v = Vec::with_capacity(HEADER_SIZE);
    v.extend([sysex::SOX, sysex::MANUFACTURER, sysex::MODEL, device & 0x7f, sysex::EDITOR,
        sysex::CMD_PRESET_DUMP, mode.header_byte()]);
    v.extend([0; 4]);
    v.extend(codec::encode_u28(variant.payload_len() as u32));
    for count in variant.section_counts() {
        let (lsb, msb) = codec::encode(count);
        v.extend([lsb, msb]);
    }
    v.push(sysex::EOX);
    codec::write_pair(&mut v, NUMBER_OFFSET, number);
    codec::write_pair(&mut v, ROM_OFFSET, rom);
    v
}

pub fn header_number(buf: &[u8]) -> i32 {
    codec::read_pair(buf, NUMBER_OFFSET)
}

pub fn header_rom(buf: &[u8]) -> i32 {
    codec::read_pair(buf, ROM_OFFSET)
}

pub fn set_header_location(buf: &mut [u8], number: i32, rom: i32) {
    codec::write_pair(buf, NUMBER_OFFSET, number);
    codec::write_pair(buf, ROM_OFFSET, rom);
}

/// Payload byte count declared by a header.
pub fn header_byte_count(buf: &[u8]) -> usize {
    codec::decode_u28(&buf[BYTE_COUNT_OFFSET..BYTE_COUNT_OFFSET + 4]) as usize
}

/// Byte range of packet `index`'s body, and the offset of its checksum.
pub fn packet_body(variant: Variant, index: usize) -> (std::ops::Range<usize>, usize) {
    let start = HEADER_SIZE + index * PACKET_SIZE + PACKET_PREAMBLE;
    let len = PACKET_BODY.min(variant.payload_len() - index * PACKET_BODY);
    (start..start + len, start + len)
}

/// Byte range of the whole packet message `index`.
pub fn packet_range(variant: Variant, index: usize) -> std::ops::Range<usize> {
    let (body, checksum) = packet_body(variant, index);
    body.start - PACKET_PREAMBLE..checksum + 2
}

/// Concatenates the packet bodies of a preset buffer.
pub fn depacketize(buf: &[u8], variant: Variant) -> Vec<u8> {
    let mut payload = Vec::with_capacity(variant.payload_len());
    for i in 0..variant.packet_count() {
        payload.extend_from_slice(&buf[packet_body(variant, i).0]);
    }
    payload
}

/// Builds a preset buffer from a header and a payload, computing packet
/// checksums.
pub fn packetize(header: &[u8], payload: &[u8], variant: Variant, mode: TransferMode) -> Vec<u8> {
    let device = header[sysex::DEVICE_ID_OFFSET];
    let mut buf = Vec::with_capacity(variant.dump_len());
    buf.extend_from_slice(&header[..HEADER_SIZE]);
    for (i, body) in payload.chunks(PACKET_BODY).enumerate() {
        let (lsb, msb) = codec::encode(i as i32 + 1);
        buf.extend([sysex::SOX, sysex::MANUFACTURER, sysex::MODEL, device, sysex::EDITOR,
            sysex::CMD_PRESET_DUMP, mode.data_byte(), lsb, msb]);
        buf.extend_from_slice(body);
        buf.push(checksum::checksum(body));
        buf.push(sysex::EOX);
    }
    buf
}

/// Converts a payload laid out for `from` into the layout of `to`. Inserted
/// parameters are zero.
pub fn convert_payload(payload: &[u8], from: Variant, to: Variant) -> Vec<u8> {
    let mut payload = payload.to_vec();

    if from.extra_controller && !to.extra_controller {
        payload.drain(EXTRA_BLOCK_START..EXTRA_BLOCK_START + EXTRA_BLOCK_LEN);
    } else if !from.extra_controller && to.extra_controller {
        payload.splice(EXTRA_BLOCK_START..EXTRA_BLOCK_START, [0; EXTRA_BLOCK_LEN]);
    }

    let post_delay = POST_DELAY_START
        + if to.extra_controller { EXTRA_BLOCK_LEN } else { 0 };
    if !from.reduced_arp && to.reduced_arp {
        payload.drain(post_delay..post_delay + 2);
    } else if from.reduced_arp && !to.reduced_arp {
        payload.splice(post_delay..post_delay, [0; 2]);
    }

    payload
}

/// Re-lays a whole preset buffer of variant `from` as variant `to`.
pub fn repack(buf: &[u8], from: Variant, to: Variant) -> Vec<u8> {
    let payload = convert_payload(&depacketize(buf, from), from, to);
    let mode = match buf.get(HEADER_SIZE + sysex::MODE_OFFSET) {
        Some(&sysex::DATA_OPEN) => TransferMode::OpenLoop,
        _ => TransferMode::ClosedLoop,
    };
    let mut header = build_header(to, buf[sysex::DEVICE_ID_OFFSET], mode,
        header_number(buf), header_rom(buf));
    header[sysex::MODE_OFFSET] = buf[sysex::MODE_OFFSET];
    packetize(&header, &payload, to, mode)
}

/// Offset of the extra controller block in a buffer of `variant`, if it has
/// one.
pub fn extra_block_offset(variant: Variant) -> Option<usize> {
    variant.extra_controller.then(|| idmap::packet_offset(EXTRA_BLOCK_START))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::*;

    fn blank(variant: Variant) -> Vec<u8> {
        let header = build_header(variant, 0, TransferMode::ClosedLoop, 3, 0);
        packetize(&header, &vec![0; variant.payload_len()], variant, TransferMode::ClosedLoop)
    }

    #[test]
    fn test_blank_sizes() {
        for v in Variant::KNOWN {
            let buf = blank(v);
            assert_eq!(buf.len(), v.dump_len());
            assert_eq!(header_byte_count(&buf), v.payload_len());
            assert_eq!(header_number(&buf), 3);
            assert_eq!(*buf.last().unwrap(), sysex::EOX);
            for i in 0..v.packet_count() {
                let range = packet_range(v, i);
                assert_eq!(buf[range.start], sysex::SOX);
                assert_eq!(buf[range.end - 1], sysex::EOX);
                assert_eq!(codec::read_pair(&buf, range.start + 7), i as i32 + 1);
            }
        }
    }

    #[test]
    fn test_header_section_counts() {
        let buf = blank(Variant::STANDARD);
        let first = codec::read_pair(&buf, SECTION_COUNT_OFFSET);
        assert_eq!(first, 40);
        let buf = blank(Variant::REDUCED_ARP);
        assert_eq!(codec::read_pair(&buf, SECTION_COUNT_OFFSET + 2), 19);
    }

    #[test]
    fn test_extra_block_matches_mapper() {
        let v = Variant::EXTRA_CONTROLLER;
        assert_eq!(extra_block_offset(v), idmap::map(PRESET_CTRL_M, NO_LAYER, v, v.dump_len()));
        assert_eq!(extra_block_offset(Variant::STANDARD), None);
        let post = idmap::position(ARP_POST_DELAY, NO_LAYER, v).unwrap();
        assert_eq!(2 * post, POST_DELAY_START + EXTRA_BLOCK_LEN);
    }

    fn fill(variant: Variant) -> Vec<u8> {
        let mut buf = blank(variant);
        let mut n = 1;
        for id in 899..2000 {
            for layer in 0..NUM_LAYERS {
                if let Some(offset) = idmap::map(id, layer, variant, buf.len()) {
                    codec::write_pair(&mut buf, offset, n % 4000);
                    n += 1;
                }
            }
        }
        let header = buf[..HEADER_SIZE].to_vec();
        packetize(&header, &depacketize(&buf, variant), variant, TransferMode::ClosedLoop)
    }

    #[test]
    fn test_repack_keeps_shared_parameters() {
        for from in Variant::KNOWN {
            for to in Variant::KNOWN {
                let src = fill(from);
                let dst = repack(&src, from, to);
                assert_eq!(dst.len(), to.dump_len());
                for id in 899..2000 {
                    for layer in 0..NUM_LAYERS {
                        let a = idmap::map(id, layer, from, src.len());
                        let b = idmap::map(id, layer, to, dst.len());
                        match (a, b) {
                            (Some(a), Some(b)) => assert_eq!(
                                codec::read_pair(&src, a), codec::read_pair(&dst, b),
                                "{from:?} -> {to:?} id {id} layer {layer}"),
                            (None, Some(b)) => assert_eq!(codec::read_pair(&dst, b), 0),
                            _ => (),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_repack_round_trip() {
        for v in [Variant::EXTRA_CONTROLLER, Variant::REDUCED_ARP] {
            let src = fill(Variant::STANDARD);
            let back = repack(&repack(&src, Variant::STANDARD, v), v, Variant::STANDARD);
            if v.reduced_arp {
                // the dropped post-delay comes back as zero
                let offset = idmap::map(ARP_POST_DELAY, NO_LAYER, Variant::STANDARD, src.len())
                    .unwrap();
                let mut expected = src.clone();
                codec::write_pair(&mut expected, offset, 0);
                let payload = depacketize(&expected, Variant::STANDARD);
                let header = &expected[..HEADER_SIZE];
                assert_eq!(back, packetize(header, &payload, Variant::STANDARD,
                    TransferMode::ClosedLoop));
            } else {
                assert_eq!(back, src);
            }
        }
    }
}
