use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Cache key: a 128-bit fingerprint derived deterministically from the
/// path of a remote file.
///
/// Two independent 64-bit hash passes over the path form the fingerprint,
/// so the key is fixed-size, cheap to copy and usable as a directory name
/// for the segment files of that remote file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u128);

const HI_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

impl CacheKey {
    pub fn from_path(path: &str) -> Self {
        let mut lo = DefaultHasher::new();
        path.hash(&mut lo);

        let mut hi = DefaultHasher::new();
        HI_SEED.hash(&mut hi);
        path.hash(&mut hi);

        Self((u128::from(hi.finish()) << 64) | u128::from(lo.finish()))
    }

    /// Hex form used for the on-disk directory name and log lines.
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({:032x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = CacheKey::from_path("warehouse/part-0001.bin");
        let b = CacheKey::from_path("warehouse/part-0001.bin");
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn distinct_paths_distinct_keys() {
        let a = CacheKey::from_path("warehouse/part-0001.bin");
        let b = CacheKey::from_path("warehouse/part-0002.bin");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_is_32_chars() {
        assert_eq!(CacheKey::from_path("x").to_hex().len(), 32);
    }
}
