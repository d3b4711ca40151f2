//! Internet checksum (RFC 1071)

/// Compute the 16-bit one's-complement checksum of `data`.
///
/// Bytes are summed as big-endian words; an odd trailing byte is the high byte
/// of a final word padded with zero. Write the result with `to_be_bytes`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = words.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }

    // Fold carries back into the low 16 bits until none remain
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// True if a packet carrying its own checksum sums to zero
pub fn verify(data: &[u8]) -> bool {
    checksum(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // RFC 1071 section 3: sum is 0xddf2, checksum is its complement
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2u16);
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn test_checksum_zeros() {
        assert_eq!(checksum(&[0u8; 20]), 0xFFFF);
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_checksum_ones() {
        assert_eq!(checksum(&[0xFFu8; 20]), 0);
    }

    #[test]
    fn test_odd_length_pads_low_byte() {
        // 0xAB alone is the word 0xAB00
        assert_eq!(checksum(&[0xAB]), !0xAB00u16);
        assert_eq!(checksum(&[0x12, 0x34, 0xAB]), !(0x1234u16 + 0xAB00));
    }

    #[test]
    fn test_carry_folding() {
        // 0xFFFF + 0x0001 = 0x10000, folds to 0x0001
        assert_eq!(checksum(&[0xFF, 0xFF, 0x00, 0x01]), !0x0001u16);
    }

    #[test]
    fn test_self_verification() {
        // Echo request header with zero checksum, then a short payload
        let mut packet = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x07, 0x42, 0x43, 0x44];
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&packet));
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn test_matches_pnet() {
        let data: Vec<u8> = (0u8..=200).collect();
        // skipword 1 is the (already zero) ICMP checksum field
        let mut packet = data.clone();
        packet[2] = 0;
        packet[3] = 0;
        assert_eq!(checksum(&packet), pnet::packet::util::checksum(&packet, 1));
    }
}
