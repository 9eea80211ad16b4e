//! Stamp-based staleness filter.

use crate::types::Stamp;

/// Lets a stamp through only if it is strictly newer than the last one
/// let through. "No stamp yet" is older than every stamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StalenessFilter {
    last: Option<Stamp>,
}

impl StalenessFilter {
    pub fn starting_at(last: Option<Stamp>) -> Self {
        Self { last }
    }

    pub fn is_newer(&self, stamp: Stamp) -> bool {
        Some(stamp) > self.last
    }

    /// Record `stamp` if newer. Returns whether it was accepted.
    pub fn accept(&mut self, stamp: Stamp) -> bool {
        if !self.is_newer(stamp) {
            return false;
        }
        self.last = Some(stamp);
        true
    }

    pub fn last(&self) -> Option<Stamp> {
        self.last
    }
}
