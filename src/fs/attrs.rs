//! Kernel cache-directive policy: every node kind carries a
//! [`CacheClass`] governing the entry/attribute timeouts handed back to the
//! kernel and whether the node bypasses the page cache.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    /// Message fields, README, model fields, projected JSON leaves: content
    /// never changes once written. Long timeouts, page cache kept.
    Immutable,
    /// Model/conversation listings, conversation metadata: moderate TTL.
    SemiStable,
    /// send/ctl/clone/count/presence files: always bypass the kernel cache.
    Mutable,
    /// Negative lookups for entries that may begin to exist shortly
    /// (created/archived transitions) — short but never infinite.
    Negative,
}

impl CacheClass {
    pub fn ttl(self) -> Duration {
        match self {
            CacheClass::Immutable => Duration::from_secs(3600),
            CacheClass::SemiStable => Duration::from_secs(30),
            CacheClass::Mutable => Duration::ZERO,
            CacheClass::Negative => Duration::from_secs(2),
        }
    }

    pub fn direct_io(self) -> bool {
        matches!(self, CacheClass::Mutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutable_nodes_get_zero_ttl_and_direct_io() {
        assert_eq!(CacheClass::Mutable.ttl(), Duration::ZERO);
        assert!(CacheClass::Mutable.direct_io());
    }

    #[test]
    fn negative_lookups_are_short_not_infinite() {
        assert!(CacheClass::Negative.ttl() > Duration::ZERO);
        assert!(CacheClass::Negative.ttl() < CacheClass::SemiStable.ttl());
    }
}
