//! Bookkeeping for one 1-Wire ROM search session.
//!
//! A [`SearchState`] is a plain value: the discovery functions in
//! [`crate::discovery`] take it by `&mut` and nothing else holds on to it.
//! Two searches that must not disturb each other simply use two states.
//!
//! # Discrepancy bookkeeping (for beginners)
//!
//! During a search every device still "in the race" answers each address bit
//! twice: once with the bit and once with its complement.  When two devices
//! disagree, the bus reads `0,0` and the master must pick a branch.  The
//! state remembers the *last* bit position where it picked the 0 branch
//! (`last_discrepancy`), so the next pass can retrace the same path up to
//! that point and take the 1 branch there instead.  When no such position is
//! left, the last device has been found.
//!
//! Bit positions are 1-based (1..=64); 0 means "none recorded".

use std::collections::BTreeSet;

use crate::domain::address::RomId;

/// Highest value `last_discrepancy` may take.
pub const MAX_DISCREPANCY: u8 = 64;

/// Mutable state carried between `find_first` / `find_next` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    /// Address produced by the most recent successful pass.
    pub current_address: RomId,
    /// 1-based bit of the deepest unexplored 0-branch, or 0.
    pub last_discrepancy: u8,
    /// Like `last_discrepancy`, restricted to the family byte (bits 1..=8).
    pub last_family_discrepancy: u8,
    /// Set once the pass that found the last device has completed.
    pub last_device_flag: bool,
    /// Search with the conditional (alarm) ROM command instead of the normal one.
    pub alarm_only: bool,
    /// Do not issue a bus reset before each search pass.
    pub skip_reset_on_search: bool,
    /// When non-empty, only these family codes are reported.
    pub include_families: BTreeSet<u8>,
    /// Family codes that are never reported.
    pub exclude_families: BTreeSet<u8>,
    /// Treat an address whose CRC8 does not verify as a failed pass.
    pub require_valid_crc: bool,
}

impl SearchState {
    /// Creates a state that searches every device on the bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the traversal bookkeeping to the "first search" state.
    ///
    /// Filters and search options are kept.
    pub fn reset_traversal(&mut self) {
        self.last_discrepancy = 0;
        self.last_family_discrepancy = 0;
        self.last_device_flag = false;
    }

    /// Returns `true` if no traversal is in progress.
    pub fn is_fresh(&self) -> bool {
        self.last_discrepancy == 0 && self.last_family_discrepancy == 0 && !self.last_device_flag
    }

    /// Restricts the search to the given families, replacing any previous
    /// inclusion list.
    pub fn target_families(&mut self, families: &[u8]) {
        self.include_families = families.iter().copied().collect();
    }

    /// Adds families to the exclusion list.
    pub fn exclude_families(&mut self, families: &[u8]) {
        self.exclude_families.extend(families.iter().copied());
    }

    /// Clears both family filters.
    pub fn target_all_families(&mut self) {
        self.include_families.clear();
        self.exclude_families.clear();
    }

    /// Searches every device, alarming or not.
    pub fn search_all_devices(&mut self) {
        self.alarm_only = false;
    }

    /// Returns `true` if a device of `family` passes both filters.
    pub fn accepts_family(&self, family: u8) -> bool {
        if self.exclude_families.contains(&family) {
            return false;
        }
        self.include_families.is_empty() || self.include_families.contains(&family)
    }

    /// If exactly one family is targeted, returns it.
    pub fn single_target_family(&self) -> Option<u8> {
        if self.include_families.len() == 1 {
            self.include_families.iter().next().copied()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_fresh_and_accepts_everything() {
        let state = SearchState::new();
        assert!(state.is_fresh());
        assert!(state.accepts_family(0x00));
        assert!(state.accepts_family(0x28));
    }

    #[test]
    fn test_reset_traversal_keeps_filters() {
        // Arrange
        let mut state = SearchState::new();
        state.target_families(&[0x10]);
        state.alarm_only = true;
        state.last_discrepancy = 17;
        state.last_family_discrepancy = 3;
        state.last_device_flag = true;

        // Act
        state.reset_traversal();

        // Assert
        assert!(state.is_fresh());
        assert!(state.alarm_only);
        assert_eq!(state.single_target_family(), Some(0x10));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let mut state = SearchState::new();
        state.target_families(&[0x28]);
        state.exclude_families(&[0x28]);
        assert!(!state.accepts_family(0x28));
    }

    #[test]
    fn test_include_list_rejects_other_families() {
        let mut state = SearchState::new();
        state.target_families(&[0x28, 0x10]);
        assert!(state.accepts_family(0x10));
        assert!(!state.accepts_family(0x01));
        assert_eq!(state.single_target_family(), None);
    }

    #[test]
    fn test_target_all_families_clears_both_lists() {
        let mut state = SearchState::new();
        state.target_families(&[0x28]);
        state.exclude_families(&[0x01]);
        state.target_all_families();
        assert!(state.accepts_family(0x01));
        assert!(state.accepts_family(0x42));
    }
}
