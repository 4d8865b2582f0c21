//! Integrity byte for dump packets and dump files.

/// One's complement of the byte sum, masked to 7 bits.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
    (!sum & 0x7f) as u8
}

/// Returns true if `expected` matches the checksum of `bytes`.
pub fn verify(bytes: &[u8], expected: u8) -> bool {
    checksum(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0x7f);
        assert_eq!(checksum(&[0x01]), 0x7e);
        assert_eq!(checksum(&[0x7f, 0x7f]), 0x01);
        assert_eq!(checksum(&[0x40; 4]), 0x7f);
    }

    #[test]
    fn test_deterministic() {
        let bytes: Vec<u8> = (0..244).map(|i| (i * 7 % 128) as u8).collect();
        let first = checksum(&bytes);
        assert_eq!(checksum(&bytes), first);
        let mut copy = bytes.clone();
        copy[10] = bytes[10];
        assert_eq!(checksum(&copy), first);
        assert!(verify(&bytes, first));
        copy[10] ^= 1;
        assert!(!verify(&copy, first));
    }
}
