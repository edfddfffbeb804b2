//! Explicit re-authentication state machine.
//!
//! `transition` is pure: it maps the current phase and one input to the next
//! phase plus the effects the gate must carry out. All escalation and
//! fail-closed decisions live here so they can be checked exhaustively
//! without a platform.

use serde::Serialize;

use crate::platform::{AuthEvent, PromptKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    /// No unlock needed.
    Idle,
    /// Unlock needed, no prompt shown yet.
    AwaitingUnlock,
    /// Exactly one primary prompt in flight.
    PromptActive { failed_attempts: u32 },
    /// Primary was abandoned after repeated failures; device credential prompt in flight.
    FallbackActive,
    /// Terminal per cycle. The gate settles this back to `Idle`.
    Unlocked,
}

impl Phase {
    pub fn prompt_in_flight(self) -> bool {
        matches!(self, Phase::PromptActive { .. } | Phase::FallbackActive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The app was fully backgrounded while protected.
    Armed,
    /// The session stopped being protected (policy off, token gone, capability lost).
    Disarmed,
    /// The in-flight token was acquired for a new cycle.
    PromptGranted,
    Auth { kind: PromptKind, event: AuthEvent },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartPrimary,
    StartFallback,
    Cancel(PromptKind),
    VerifyIdentity,
    /// Clear the unlock requirement, release the in-flight token, run the continuation.
    Grant,
    /// Fail closed: re-arm, release the in-flight token, notify, background the app.
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: Phase,
    pub effects: Vec<Effect>,
}

impl Step {
    fn to(next: Phase, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(phase: Phase) -> Self {
        Self::to(phase, Vec::new())
    }
}

pub fn transition(phase: Phase, input: Input, threshold: u32) -> Step {
    use Effect::*;
    use PromptKind::{Fallback, Primary};

    match (phase, input) {
        (Phase::Idle | Phase::Unlocked, Input::Armed) => Step::to(Phase::AwaitingUnlock, vec![]),
        (_, Input::Armed) => Step::stay(phase),

        (Phase::PromptActive { .. }, Input::Disarmed) => {
            Step::to(Phase::Idle, vec![Cancel(Primary), Grant])
        }
        (Phase::FallbackActive, Input::Disarmed) => {
            Step::to(Phase::Idle, vec![Cancel(Fallback), Grant])
        }
        (_, Input::Disarmed) => Step::to(Phase::Idle, vec![]),

        (Phase::Idle | Phase::AwaitingUnlock | Phase::Unlocked, Input::PromptGranted) => Step::to(
            Phase::PromptActive { failed_attempts: 0 },
            vec![StartPrimary],
        ),
        // A second grant while a prompt is up cannot happen behind the
        // compare-and-set; treat it as a no-op.
        (_, Input::PromptGranted) => Step::stay(phase),

        (Phase::PromptActive { failed_attempts }, Input::Auth { kind: Primary, event }) => {
            match event {
                AuthEvent::Succeeded => Step::to(Phase::Unlocked, vec![Grant]),
                AuthEvent::FailedAttempt => {
                    let failed_attempts = failed_attempts.saturating_add(1);
                    if failed_attempts >= threshold {
                        Step::to(
                            Phase::FallbackActive,
                            vec![VerifyIdentity, Cancel(Primary), StartFallback],
                        )
                    } else {
                        Step::to(Phase::PromptActive { failed_attempts }, vec![VerifyIdentity])
                    }
                }
                AuthEvent::Error(_) => Step::to(Phase::AwaitingUnlock, vec![Deny]),
            }
        }

        (Phase::FallbackActive, Input::Auth { kind: Primary, event }) => match event {
            // Artifact of cancelling the primary prompt on escalation.
            AuthEvent::Error(err) if err.is_cancellation() => Step::stay(phase),
            AuthEvent::Error(_) => {
                Step::to(Phase::AwaitingUnlock, vec![Cancel(Fallback), Deny])
            }
            AuthEvent::Succeeded => Step::to(Phase::Unlocked, vec![Cancel(Fallback), Grant]),
            AuthEvent::FailedAttempt => Step::stay(phase),
        },

        (Phase::FallbackActive, Input::Auth { kind: Fallback, event }) => match event {
            AuthEvent::Succeeded => Step::to(Phase::Unlocked, vec![Grant]),
            AuthEvent::FailedAttempt => Step::to(phase, vec![VerifyIdentity]),
            AuthEvent::Error(_) => Step::to(Phase::AwaitingUnlock, vec![Deny]),
        },

        // Stale delivery for a prompt that is no longer active.
        (_, Input::Auth { .. }) => Step::stay(phase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::AuthError;

    const THRESHOLD: u32 = 3;

    fn primary(event: AuthEvent) -> Input {
        Input::Auth {
            kind: PromptKind::Primary,
            event,
        }
    }

    fn fallback(event: AuthEvent) -> Input {
        Input::Auth {
            kind: PromptKind::Fallback,
            event,
        }
    }

    fn run(mut phase: Phase, inputs: &[Input]) -> (Phase, Vec<Effect>) {
        let mut effects = Vec::new();
        for input in inputs {
            let step = transition(phase, *input, THRESHOLD);
            phase = step.next;
            effects.extend(step.effects);
        }
        (phase, effects)
    }

    #[test]
    fn armed_then_granted_starts_primary() {
        let (phase, effects) = run(Phase::Idle, &[Input::Armed, Input::PromptGranted]);
        assert_eq!(phase, Phase::PromptActive { failed_attempts: 0 });
        assert_eq!(effects, vec![Effect::StartPrimary]);
    }

    #[test]
    fn primary_success_unlocks() {
        let (phase, effects) = run(
            Phase::AwaitingUnlock,
            &[Input::PromptGranted, primary(AuthEvent::Succeeded)],
        );
        assert_eq!(phase, Phase::Unlocked);
        assert_eq!(effects, vec![Effect::StartPrimary, Effect::Grant]);
    }

    #[test]
    fn escalates_on_threshold() {
        let (phase, effects) = run(
            Phase::AwaitingUnlock,
            &[
                Input::PromptGranted,
                primary(AuthEvent::FailedAttempt),
                primary(AuthEvent::FailedAttempt),
            ],
        );
        assert_eq!(phase, Phase::PromptActive { failed_attempts: 2 });
        assert!(!effects.contains(&Effect::StartFallback));

        let step = transition(phase, primary(AuthEvent::FailedAttempt), THRESHOLD);
        assert_eq!(step.next, Phase::FallbackActive);
        assert_eq!(
            step.effects,
            vec![
                Effect::VerifyIdentity,
                Effect::Cancel(PromptKind::Primary),
                Effect::StartFallback
            ]
        );
    }

    #[test]
    fn escalation_cancel_is_ignored() {
        for err in [
            AuthError::Cancelled,
            AuthError::UserCancelled,
            AuthError::NegativeButton,
        ] {
            let step = transition(
                Phase::FallbackActive,
                primary(AuthEvent::Error(err)),
                THRESHOLD,
            );
            assert_eq!(step, Step::stay(Phase::FallbackActive));
        }
    }

    #[test]
    fn primary_lockout_during_fallback_fails_closed() {
        let step = transition(
            Phase::FallbackActive,
            primary(AuthEvent::Error(AuthError::Lockout)),
            THRESHOLD,
        );
        assert_eq!(step.next, Phase::AwaitingUnlock);
        assert_eq!(
            step.effects,
            vec![Effect::Cancel(PromptKind::Fallback), Effect::Deny]
        );
    }

    #[test]
    fn primary_error_fails_closed() {
        let step = transition(
            Phase::PromptActive { failed_attempts: 1 },
            primary(AuthEvent::Error(AuthError::UserCancelled)),
            THRESHOLD,
        );
        assert_eq!(step.next, Phase::AwaitingUnlock);
        assert_eq!(step.effects, vec![Effect::Deny]);
    }

    #[test]
    fn fallback_outcomes() {
        let ok = transition(Phase::FallbackActive, fallback(AuthEvent::Succeeded), THRESHOLD);
        assert_eq!(ok.next, Phase::Unlocked);
        assert_eq!(ok.effects, vec![Effect::Grant]);

        let miss = transition(
            Phase::FallbackActive,
            fallback(AuthEvent::FailedAttempt),
            THRESHOLD,
        );
        assert_eq!(miss.next, Phase::FallbackActive);
        assert_eq!(miss.effects, vec![Effect::VerifyIdentity]);

        let err = transition(
            Phase::FallbackActive,
            fallback(AuthEvent::Error(AuthError::UserCancelled)),
            THRESHOLD,
        );
        assert_eq!(err.next, Phase::AwaitingUnlock);
        assert_eq!(err.effects, vec![Effect::Deny]);
    }

    #[test]
    fn disarm_cancels_active_prompt_and_grants() {
        let step = transition(
            Phase::PromptActive { failed_attempts: 2 },
            Input::Disarmed,
            THRESHOLD,
        );
        assert_eq!(step.next, Phase::Idle);
        assert_eq!(
            step.effects,
            vec![Effect::Cancel(PromptKind::Primary), Effect::Grant]
        );

        let idle = transition(Phase::AwaitingUnlock, Input::Disarmed, THRESHOLD);
        assert_eq!(idle, Step::stay(Phase::Idle));
    }

    #[test]
    fn stale_events_are_ignored() {
        for phase in [Phase::Idle, Phase::AwaitingUnlock, Phase::Unlocked] {
            for event in [
                AuthEvent::Succeeded,
                AuthEvent::FailedAttempt,
                AuthEvent::Error(AuthError::Hardware),
            ] {
                assert_eq!(transition(phase, primary(event), THRESHOLD), Step::stay(phase));
                assert_eq!(transition(phase, fallback(event), THRESHOLD), Step::stay(phase));
            }
        }
        let step = transition(
            Phase::PromptActive { failed_attempts: 0 },
            fallback(AuthEvent::Succeeded),
            THRESHOLD,
        );
        assert_eq!(step, Step::stay(Phase::PromptActive { failed_attempts: 0 }));
    }

    #[test]
    fn second_grant_is_noop() {
        let active = Phase::PromptActive { failed_attempts: 1 };
        assert_eq!(transition(active, Input::PromptGranted, THRESHOLD), Step::stay(active));
        assert_eq!(
            transition(Phase::FallbackActive, Input::PromptGranted, THRESHOLD),
            Step::stay(Phase::FallbackActive)
        );
    }

    #[test]
    fn threshold_of_one_escalates_immediately() {
        let step = transition(
            Phase::PromptActive { failed_attempts: 0 },
            primary(AuthEvent::FailedAttempt),
            1,
        );
        assert_eq!(step.next, Phase::FallbackActive);
    }
}
