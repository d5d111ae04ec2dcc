//! Keys and the sentinel keys that bound them.

use crate::types::Value128;

/// A key names one byte stream.
pub type Key = Value128;

/// Lower bound of the key space. Never a real key.
pub const FAR_LEFT_KEY: Key = Value128::ZERO;

/// Upper bound of the key space. Never a real key.
pub const FAR_RIGHT_KEY: Key = Value128::MAX;

/// Bytes held by the two sentinel leaves of every tree.
pub const SENTINEL_BYTES: i64 = 2;

/// True for the two reserved keys.
#[must_use]
pub fn is_sentinel(key: &Key) -> bool {
    *key == FAR_LEFT_KEY || *key == FAR_RIGHT_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(is_sentinel(&FAR_LEFT_KEY));
        assert!(is_sentinel(&FAR_RIGHT_KEY));
        assert!(!is_sentinel(&Value128::from_parts(0, 1)));
        assert!(FAR_LEFT_KEY < FAR_RIGHT_KEY);
    }
}
