//! Ones'-complement checksum
//!
//! 16-bit big-endian words summed with end-around carry, odd trailing byte
//! padded with zero. A result can seed the next call, so a message split
//! across buffers checksums the same as the concatenation as long as every
//! buffer but the last has even length.
//!
//! This is an integrity check against corruption and desynchronised keys,
//! not against tampering.

/// Checksum of `data`, optionally continuing from a previous result
pub fn checksum(data: &[u8], prev: Option<u16>) -> u16 {
    let mut sum: u64 = prev.map_or(0, |c| (!c) as u64);

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u64;
    }
    if let [last] = words.remainder() {
        sum += (*last as u64) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
