//! Optimistic concurrency versions.

/// Version written by the first successful save of any entity.
pub const INITIAL_VERSION: u32 = 1;

/// Optimistic concurrency expectation for a versioned entity.
///
/// Every write against an already-persisted entity must name the version the
/// caller last observed; the store only applies the write when that version is
/// still current.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The entity has never been persisted (first-time creation).
    Absent,
    /// Require the stored entity to be at an exact version.
    Exact(u32),
}

impl ExpectedVersion {
    /// Expectation derived from an entity's in-memory version.
    pub fn of(version: Option<u32>) -> Self {
        match version {
            None | Some(0) => ExpectedVersion::Absent,
            Some(v) => ExpectedVersion::Exact(v),
        }
    }

    /// The version stored once a write presenting this expectation succeeds,
    /// `None` when the counter would overflow.
    pub fn next(self) -> Option<u32> {
        match self {
            ExpectedVersion::Absent => Some(INITIAL_VERSION),
            ExpectedVersion::Exact(v) => v.checked_add(1),
        }
    }

    pub fn matches(self, actual: Option<u32>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_creates_initial_version() {
        assert_eq!(ExpectedVersion::of(None), ExpectedVersion::Absent);
        assert_eq!(ExpectedVersion::of(Some(0)), ExpectedVersion::Absent);
        assert_eq!(ExpectedVersion::Absent.next(), Some(INITIAL_VERSION));
    }

    #[test]
    fn exact_advances_by_one() {
        assert_eq!(ExpectedVersion::Exact(3).next(), Some(4));
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
        assert_eq!(ExpectedVersion::Exact(u32::MAX).next(), None);
    }
}
