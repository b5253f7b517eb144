/// Inclusive byte interval `[left, right]` within one remote file.
///
/// `size()` counts both boundaries, so `[0, 9]` covers ten bytes. Live
/// ranges for the same key never overlap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Range {
    pub left: u64,
    pub right: u64,
}

impl Range {
    pub fn new(left: u64, right: u64) -> Self {
        debug_assert!(left <= right, "invalid range [{left}, {right}]");
        Self { left, right }
    }

    /// Builds the range covering `size` bytes starting at `offset`.
    pub fn from_offset_size(offset: u64, size: u64) -> Self {
        debug_assert!(size > 0, "zero-sized range at offset {offset}");
        Self::new(offset, offset + size - 1)
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.right - self.left + 1
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        self.left <= offset && offset <= self.right
    }

    #[inline]
    pub fn intersects(&self, other: &Range) -> bool {
        self.left <= other.right && other.left <= self.right
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.left, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_both_boundaries() {
        assert_eq!(Range::new(0, 9).size(), 10);
        assert_eq!(Range::new(5, 5).size(), 1);
        assert_eq!(Range::from_offset_size(10, 4), Range::new(10, 13));
    }

    #[test]
    fn intersection() {
        let a = Range::new(10, 19);
        assert!(a.intersects(&Range::new(19, 30)));
        assert!(a.intersects(&Range::new(0, 10)));
        assert!(a.intersects(&Range::new(12, 15)));
        assert!(!a.intersects(&Range::new(20, 25)));
        assert!(!a.intersects(&Range::new(0, 9)));
    }

    #[test]
    fn contains_is_inclusive() {
        let r = Range::new(3, 7);
        assert!(r.contains(3));
        assert!(r.contains(7));
        assert!(!r.contains(8));
        assert!(!r.contains(2));
    }
}
