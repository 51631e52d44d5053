//! Handle, group and common state machines
//!
//! Each state type carries its legal transition table. Public operations
//! check their entry state with [`require`] and move between states with
//! `transition`, which refuses anything the table does not list.

use core::fmt::Debug;

use super::{Error, Result};

/// Global state of an instance handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalState {
    /// Not initialized, or torn down
    Reset,
    /// Bound to an instance, not configured
    Init,
    /// Instance-wide configuration applied, no group configured yet
    Configuring,
    /// Configured, analog core disabled
    Idle,
    /// Analog core enabled and ready to convert
    Active,
    /// Self-calibration in progress
    Calibrating,
}

/// State of one conversion group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    /// Group not configured
    Reset,
    /// Configured, no conversion running
    Idle,
    /// Conversions running
    Active,
    /// Circular DMA conversions running with interrupts suppressed
    ActiveSilent,
}

/// Multimode state shared by all handles of a link chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommonState {
    /// Not part of a link chain
    Independent,
    /// Linked to other handles, sampling independently
    Linked,
    /// Linked and configured for synchronized sampling
    Multimode,
}

/// Number of results one trigger produces on a group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// One trigger converts the sequence once, then the group goes idle
    Unit,
    /// Conversions continue until explicitly stopped
    Multiple,
}

impl GlobalState {
    /// Whether the transition table allows `self -> next`
    pub fn allows(self, next: GlobalState) -> bool {
        use GlobalState::*;

        match (self, next) {
            // Teardown is always possible
            (_, Reset) => true,
            (Reset, Init) => true,
            (Init, Configuring) => true,
            (Configuring, Configuring) => true,
            (Configuring, Idle) => true,
            (Idle, Idle) => true,
            (Idle, Active) => true,
            (Active, Idle) => true,
            (Active, Calibrating) => true,
            (Calibrating, Active) => true,
            (Calibrating, Idle) => true,
            _ => false,
        }
    }
}

impl GroupState {
    /// Whether the transition table allows `self -> next`
    pub fn allows(self, next: GroupState) -> bool {
        use GroupState::*;

        match (self, next) {
            (_, Reset) => true,
            (Reset, Idle) => true,
            (Idle, Idle) => true,
            (Idle, Active) | (Idle, ActiveSilent) => true,
            (Active, Idle) | (ActiveSilent, Idle) => true,
            (Active, Active) => true,
            _ => false,
        }
    }

    /// `Active` or `ActiveSilent`
    pub fn is_active(self) -> bool {
        matches!(self, GroupState::Active | GroupState::ActiveSilent)
    }
}

impl CommonState {
    /// Whether the transition table allows `self -> next`
    pub fn allows(self, next: CommonState) -> bool {
        use CommonState::*;

        !matches!((self, next), (Independent, Multimode))
    }
}

/// A state with a transition table
pub(crate) trait StateMachine: Copy + PartialEq + Debug {
    fn allows(self, next: Self) -> bool;
}

impl StateMachine for GlobalState {
    fn allows(self, next: Self) -> bool {
        GlobalState::allows(self, next)
    }
}

impl StateMachine for GroupState {
    fn allows(self, next: Self) -> bool {
        GroupState::allows(self, next)
    }
}

impl StateMachine for CommonState {
    fn allows(self, next: Self) -> bool {
        CommonState::allows(self, next)
    }
}

/// Checks that `current` is one of the states an operation may start from
pub(crate) fn require<S: StateMachine>(current: S, allowed: &[S]) -> Result<()> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        debug!("operation not allowed in state {:?}", current);
        Err(Error::InvalidState)
    }
}

/// Moves `state` to `next` if the transition table allows it
pub(crate) fn transition<S: StateMachine>(state: &mut S, next: S) -> Result<()> {
    if state.allows(next) {
        trace!("{:?} -> {:?}", *state, next);
        *state = next;
        Ok(())
    } else {
        debug!("illegal transition {:?} -> {:?}", *state, next);
        Err(Error::InvalidState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_lifecycle_is_legal() {
        let mut s = GlobalState::Reset;
        for next in [
            GlobalState::Init,
            GlobalState::Configuring,
            GlobalState::Idle,
            GlobalState::Active,
            GlobalState::Calibrating,
            GlobalState::Active,
            GlobalState::Idle,
            GlobalState::Reset,
        ] {
            assert_eq!(transition(&mut s, next), Ok(()));
        }
        assert_eq!(s, GlobalState::Reset);
    }

    #[test]
    fn global_rejects_shortcuts() {
        assert!(!GlobalState::Init.allows(GlobalState::Active));
        assert!(!GlobalState::Idle.allows(GlobalState::Calibrating));
        assert!(!GlobalState::Reset.allows(GlobalState::Idle));

        let mut s = GlobalState::Idle;
        assert_eq!(transition(&mut s, GlobalState::Calibrating), Err(Error::InvalidState));
        assert_eq!(s, GlobalState::Idle);
    }

    #[test]
    fn group_lifecycle() {
        let mut g = GroupState::Reset;
        assert_eq!(transition(&mut g, GroupState::Active), Err(Error::InvalidState));
        assert_eq!(transition(&mut g, GroupState::Idle), Ok(()));
        assert_eq!(transition(&mut g, GroupState::ActiveSilent), Ok(()));
        assert!(g.is_active());
        assert_eq!(transition(&mut g, GroupState::Active), Err(Error::InvalidState));
        assert_eq!(transition(&mut g, GroupState::Idle), Ok(()));
    }

    #[test]
    fn common_never_jumps_to_multimode() {
        assert!(!CommonState::Independent.allows(CommonState::Multimode));
        assert!(CommonState::Linked.allows(CommonState::Multimode));
        assert!(CommonState::Multimode.allows(CommonState::Independent));
    }

    #[test]
    fn require_matches_allowed_set() {
        assert_eq!(require(GroupState::Idle, &[GroupState::Reset, GroupState::Idle]), Ok(()));
        assert_eq!(require(GroupState::Active, &[GroupState::Idle]), Err(Error::InvalidState));
    }
}
