//! Fixed width 128-bit values.
//!
//! A `Value128` is used both as a key (the identifier of a byte stream) and
//! as the raw encoding of a node address. Ordering is unsigned big-endian
//! byte comparison, which is what `[u8; 16]` derives.

use std::fmt;

/// Width of a value in bytes.
pub const VALUE128_SIZE: usize = 16;

/// An immutable 16-byte value.
///
/// # Invariants
///
/// - The value is exactly 16 bytes.
/// - `a < b` iff the big-endian unsigned integer of `a` is smaller than `b`'s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Value128(pub [u8; VALUE128_SIZE]);

impl Value128 {
    /// The all-zero value.
    pub const ZERO: Self = Self([0u8; VALUE128_SIZE]);
    /// The all-ones value.
    pub const MAX: Self = Self([0xffu8; VALUE128_SIZE]);

    /// Build a value from its high and low 64-bit halves.
    #[must_use]
    pub fn from_parts(high: u64, low: u64) -> Self {
        let mut bytes = [0u8; VALUE128_SIZE];
        bytes[..8].copy_from_slice(&high.to_be_bytes());
        bytes[8..].copy_from_slice(&low.to_be_bytes());
        Self(bytes)
    }

    /// Parse a hexadecimal string.
    ///
    /// Shorter strings are right-aligned (zero-extended on the left), so
    /// `"abcd"` parses to the value 0xabcd. Returns `None` if the string is
    /// empty, longer than 32 digits or contains a non-hex character.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > VALUE128_SIZE * 2 {
            return None;
        }

        let mut bytes = [0u8; VALUE128_SIZE];
        // Walk from the least significant digit.
        for (i, c) in s.chars().rev().enumerate() {
            let digit = u8::try_from(c.to_digit(16)?).ok()?;
            let byte_index = VALUE128_SIZE - 1 - i / 2;
            if i % 2 == 0 {
                bytes[byte_index] |= digit;
            } else {
                bytes[byte_index] |= digit << 4;
            }
        }
        Some(Self(bytes))
    }

    /// The high 64 bits.
    #[must_use]
    pub fn high(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(b)
    }

    /// The low 64 bits.
    #[must_use]
    pub fn low(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[8..]);
        u64::from_be_bytes(b)
    }

    /// Byte at the given index (0 is the most significant).
    #[must_use]
    pub const fn byte_at(&self, index: usize) -> u8 {
        self.0[index]
    }

    /// Get the underlying byte array.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; VALUE128_SIZE] {
        &self.0
    }
}

impl fmt::Display for Value128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; VALUE128_SIZE]> for Value128 {
    fn from(bytes: [u8; VALUE128_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Value128> for [u8; VALUE128_SIZE] {
    fn from(value: Value128) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_round_trip() {
        let v = Value128::from_parts(0x00f2_0000_0000_0000, 0xabcd);
        assert_eq!(v.high(), 0x00f2_0000_0000_0000);
        assert_eq!(v.low(), 0xabcd);
        assert_eq!(v.byte_at(1), 0xf2);
    }

    #[test]
    fn test_from_hex_full_width() {
        let v = Value128::from_hex("00f200000000000000000000000abcd7").unwrap();
        assert_eq!(v.high(), 0x00f2_0000_0000_0000);
        assert_eq!(v.low(), 0x000a_bcd7);
        assert_eq!(v.to_string(), "00f200000000000000000000000abcd7");
    }

    #[test]
    fn test_from_hex_right_aligned() {
        let v = Value128::from_hex("abc").unwrap();
        assert_eq!(v, Value128::from_parts(0, 0xabc));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(Value128::from_hex("").is_none());
        assert!(Value128::from_hex("xyz").is_none());
        assert!(Value128::from_hex(&"1".repeat(33)).is_none());
    }

    #[test]
    fn test_ordering_is_unsigned_big_endian() {
        let small = Value128::from_parts(0, u64::MAX);
        let large = Value128::from_parts(1, 0);
        assert!(small < large);
        assert!(Value128::ZERO < small);
        assert!(large < Value128::MAX);
        // The top bit set must still order after everything below it.
        assert!(Value128::from_parts(0x7fff_ffff_ffff_ffff, 0) < Value128::from_parts(0x8000_0000_0000_0000, 0));
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        assert_eq!(Value128::MAX.to_string(), "f".repeat(32));
        assert_eq!(Value128::ZERO.to_string(), "0".repeat(32));
    }
}
