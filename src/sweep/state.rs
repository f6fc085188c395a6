//! Pipeline State Machine
//!
//! States, events and the transition function for one account's sweep.

/// Pipeline FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    BalanceChecked,
    Quoted,
    Built,
    Signed,
    Broadcast,
    Confirmed,
    Done,
    Skipped,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::BalanceChecked => "balance_checked",
            PipelineState::Quoted => "quoted",
            PipelineState::Built => "built",
            PipelineState::Signed => "signed",
            PipelineState::Broadcast => "broadcast",
            PipelineState::Confirmed => "confirmed",
            PipelineState::Done => "done",
            PipelineState::Skipped => "skipped",
            PipelineState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Skipped | PipelineState::Failed
        )
    }
}

/// FSM Events
#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent {
    /// Balance read and non-zero
    BalanceOk,
    /// Fee quote obtained and affordable
    QuoteOk,
    /// Nonce fetched, request assembled
    BuildOk,
    SignOk,
    BroadcastOk,
    /// Confirmation wait finished, whatever its verdict
    ConfirmWaitDone,
    /// Dry run stopped before signing, or the broadcast step is wrapped up
    Finish,
    /// Zero balance, unaffordable fee, or interrupt before signing
    Skip,
    Fail,
}

/// State transition function
///
/// Invalid transitions return the current state (no change).
pub fn transition(current: PipelineState, event: PipelineEvent) -> PipelineState {
    use PipelineEvent::*;
    use PipelineState::*;

    if current.is_terminal() {
        return current;
    }

    match (current, event) {
        (Init, BalanceOk) => BalanceChecked,
        (BalanceChecked, QuoteOk) => Quoted,
        (Quoted, BuildOk) => Built,
        (Built, SignOk) => Signed,
        (Signed, BroadcastOk) => Broadcast,
        (Broadcast, ConfirmWaitDone) => Confirmed,

        (Built, Finish) | (Broadcast, Finish) | (Confirmed, Finish) => Done,

        // Zero balance at Init, unaffordable at BalanceChecked, interrupt at Built
        (Init, Skip) | (BalanceChecked, Skip) | (Quoted, Skip) | (Built, Skip) => Skipped,

        // Broadcast is the commit point; nothing after it can fail the account
        (Broadcast, Fail) | (Confirmed, Fail) => current,
        (_, Fail) => Failed,

        // Invalid transitions - stay in current state
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Skipped.is_terminal());
        assert!(PipelineState::Failed.is_terminal());

        assert!(!PipelineState::Init.is_terminal());
        assert!(!PipelineState::Broadcast.is_terminal());
        assert!(!PipelineState::Confirmed.is_terminal());
    }

    #[test]
    fn test_happy_path_with_confirmation() {
        let mut state = PipelineState::Init;
        for (event, expected) in [
            (PipelineEvent::BalanceOk, PipelineState::BalanceChecked),
            (PipelineEvent::QuoteOk, PipelineState::Quoted),
            (PipelineEvent::BuildOk, PipelineState::Built),
            (PipelineEvent::SignOk, PipelineState::Signed),
            (PipelineEvent::BroadcastOk, PipelineState::Broadcast),
            (PipelineEvent::ConfirmWaitDone, PipelineState::Confirmed),
            (PipelineEvent::Finish, PipelineState::Done),
        ] {
            state = transition(state, event);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_dry_run_finishes_before_signing() {
        let state = transition(PipelineState::Built, PipelineEvent::Finish);
        assert_eq!(state, PipelineState::Done);
        // A signed transaction must be broadcast or fail
        let state = transition(PipelineState::Signed, PipelineEvent::Finish);
        assert_eq!(state, PipelineState::Signed);
    }

    #[test]
    fn test_skip_only_before_signing() {
        assert_eq!(transition(PipelineState::Init, PipelineEvent::Skip), PipelineState::Skipped);
        assert_eq!(
            transition(PipelineState::BalanceChecked, PipelineEvent::Skip),
            PipelineState::Skipped
        );
        assert_eq!(transition(PipelineState::Built, PipelineEvent::Skip), PipelineState::Skipped);
        // Once broadcast, the transfer cannot be skipped
        assert_eq!(
            transition(PipelineState::Broadcast, PipelineEvent::Skip),
            PipelineState::Broadcast
        );
    }

    #[test]
    fn test_fail_from_any_live_state() {
        for state in [
            PipelineState::Init,
            PipelineState::BalanceChecked,
            PipelineState::Quoted,
            PipelineState::Built,
            PipelineState::Signed,
        ] {
            assert_eq!(transition(state, PipelineEvent::Fail), PipelineState::Failed);
        }
    }

    #[test]
    fn test_broadcast_cannot_fail() {
        assert_eq!(
            transition(PipelineState::Broadcast, PipelineEvent::Fail),
            PipelineState::Broadcast
        );
        assert_eq!(
            transition(PipelineState::Confirmed, PipelineEvent::Fail),
            PipelineState::Confirmed
        );
    }

    #[test]
    fn test_terminal_state_is_stable() {
        assert_eq!(transition(PipelineState::Done, PipelineEvent::Fail), PipelineState::Done);
        assert_eq!(
            transition(PipelineState::Skipped, PipelineEvent::BalanceOk),
            PipelineState::Skipped
        );
        assert_eq!(
            transition(PipelineState::Failed, PipelineEvent::Finish),
            PipelineState::Failed
        );
    }

    #[test]
    fn test_invalid_transition_stays_in_current() {
        assert_eq!(
            transition(PipelineState::Init, PipelineEvent::SignOk),
            PipelineState::Init
        );
        assert_eq!(
            transition(PipelineState::Quoted, PipelineEvent::BroadcastOk),
            PipelineState::Quoted
        );
    }
}
