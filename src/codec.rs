//! Conversion between signed parameter values and the 7-bit byte pairs the
//! device sends them as.

/// Largest value a byte pair can hold.
pub const MAX_VALUE: i32 = 8191;
/// Smallest value a byte pair can hold.
pub const MIN_VALUE: i32 = -8192;

const BIAS: i32 = 16384;

/// Decodes a little-endian 7-bit pair into a signed 14-bit value.
pub fn decode(lsb: u8, msb: u8) -> i32 {
    let v = (msb & 0x7f) as i32 * 128 + (lsb & 0x7f) as i32;
    if v >= BIAS / 2 { v - BIAS } else { v }
}

/// Encodes a signed 14-bit value as an (lsb, msb) pair. Values outside the
/// representable range are clamped.
pub fn encode(value: i32) -> (u8, u8) {
    let mut v = value.clamp(MIN_VALUE, MAX_VALUE);
    if v < 0 {
        v += BIAS;
    }
    ((v % 128) as u8, (v / 128) as u8)
}

/// Reads the pair starting at `offset`.
pub fn read_pair(buf: &[u8], offset: usize) -> i32 {
    decode(buf[offset], buf[offset + 1])
}

/// Writes `value` as a pair starting at `offset`.
pub fn write_pair(buf: &mut [u8], offset: usize, value: i32) {
    let (lsb, msb) = encode(value);
    buf[offset] = lsb;
    buf[offset + 1] = msb;
}

/// Encodes an unsigned count as four 7-bit bytes, LSB first.
pub fn encode_u28(value: u32) -> [u8; 4] {
    [
        (value & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 21) & 0x7f) as u8,
    ]
}

pub fn decode_u28(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).enumerate()
        .fold(0, |acc, (i, b)| acc | ((*b as u32 & 0x7f) << (7 * i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for v in MIN_VALUE..=MAX_VALUE {
            let (lsb, msb) = encode(v);
            assert!(lsb < 0x80 && msb < 0x80);
            assert_eq!(decode(lsb, msb), v);
        }
    }

    #[test]
    fn test_known_values() {
        assert_eq!(encode(0), (0, 0));
        assert_eq!(encode(127), (127, 0));
        assert_eq!(encode(128), (0, 1));
        assert_eq!(encode(-1), (127, 127));
        assert_eq!(encode(-20), (108, 127));
        assert_eq!(decode(0, 64), -8192);
        assert_eq!(decode(127, 63), 8191);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(decode_pair(encode(10000)), MAX_VALUE);
        assert_eq!(decode_pair(encode(-10000)), MIN_VALUE);
    }

    fn decode_pair((lsb, msb): (u8, u8)) -> i32 {
        decode(lsb, msb)
    }

    #[test]
    fn test_u28() {
        assert_eq!(encode_u28(1496), [0x58, 0x0b, 0, 0]);
        assert_eq!(decode_u28(&encode_u28(1496)), 1496);
        assert_eq!(decode_u28(&encode_u28(0x0fff_ffff)), 0x0fff_ffff);
    }
}
