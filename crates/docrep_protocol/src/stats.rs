//! Replication progress counters.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Progress counters for one replication worker.
///
/// Stats form a commutative monoid under [`merge`](Self::merge): addition is
/// componentwise and `ReplicationStats::default()` is the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Document revisions read from the source.
    pub docs_read: u64,
    /// Document revisions written to the target.
    pub docs_written: u64,
    /// Document revisions the target refused.
    pub doc_write_failures: u64,
    /// Revisions checked against the target.
    pub missing_checked: u64,
    /// Revisions the target reported missing.
    pub missing_found: u64,
}

impl ReplicationStats {
    /// Creates zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for documents read from the source.
    pub fn read(count: u64) -> Self {
        Self {
            docs_read: count,
            ..Self::default()
        }
    }

    /// Stats for a write call: `written` accepted, `failed` refused.
    pub fn written(written: u64, failed: u64) -> Self {
        Self {
            docs_written: written,
            doc_write_failures: failed,
            ..Self::default()
        }
    }

    /// Stats for a missing-revision check.
    pub fn missing(checked: u64, found: u64) -> Self {
        Self {
            missing_checked: checked,
            missing_found: found,
            ..Self::default()
        }
    }

    /// Returns the componentwise sum of two stats.
    pub fn merge(self, other: Self) -> Self {
        Self {
            docs_read: self.docs_read.saturating_add(other.docs_read),
            docs_written: self.docs_written.saturating_add(other.docs_written),
            doc_write_failures: self
                .doc_write_failures
                .saturating_add(other.doc_write_failures),
            missing_checked: self.missing_checked.saturating_add(other.missing_checked),
            missing_found: self.missing_found.saturating_add(other.missing_found),
        }
    }

    /// Returns true if every counter is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for ReplicationStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl AddAssign for ReplicationStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

impl Sum for ReplicationStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stats_strategy() -> impl Strategy<Value = ReplicationStats> {
        (
            0..1_000_000u64,
            0..1_000_000u64,
            0..1_000_000u64,
            0..1_000_000u64,
            0..1_000_000u64,
        )
            .prop_map(|(a, b, c, d, e)| ReplicationStats {
                docs_read: a,
                docs_written: b,
                doc_write_failures: c,
                missing_checked: d,
                missing_found: e,
            })
    }

    #[test]
    fn constructors_fill_the_right_counters() {
        let stats = ReplicationStats::read(3)
            + ReplicationStats::written(2, 1)
            + ReplicationStats::missing(10, 4);

        assert_eq!(stats.docs_read, 3);
        assert_eq!(stats.docs_written, 2);
        assert_eq!(stats.doc_write_failures, 1);
        assert_eq!(stats.missing_checked, 10);
        assert_eq!(stats.missing_found, 4);
    }

    #[test]
    fn sum_and_add_assign_agree() {
        let parts = vec![
            ReplicationStats::read(1),
            ReplicationStats::read(2),
            ReplicationStats::written(5, 0),
        ];
        let summed: ReplicationStats = parts.iter().copied().sum();

        let mut acc = ReplicationStats::new();
        for part in parts {
            acc += part;
        }

        assert_eq!(summed, acc);
        assert_eq!(acc.docs_read, 3);
        assert!(!acc.is_zero());
        assert!(ReplicationStats::new().is_zero());
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in stats_strategy(), b in stats_strategy()) {
            prop_assert_eq!(a.merge(b), b.merge(a));
        }

        #[test]
        fn merge_is_associative(
            a in stats_strategy(),
            b in stats_strategy(),
            c in stats_strategy(),
        ) {
            prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        }

        #[test]
        fn zero_is_identity(a in stats_strategy()) {
            prop_assert_eq!(a.merge(ReplicationStats::new()), a);
            prop_assert_eq!(ReplicationStats::new().merge(a), a);
        }
    }
}
