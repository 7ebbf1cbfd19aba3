//! Step acceptance rules based on the ratio of actual to predicted merit
//! reduction.

use enum_dispatch::enum_dispatch;
use std::collections::VecDeque;

use crate::settings::StepRuleType;
use crate::{E, I, Result, Settings};

const WINDOW_SIZE: I = 25;
const MINSTEP_COUNT: I = 2;

/// Result of applying a step rule.
#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    pub accept_step: bool,
    pub reduction_ratio: E,
}

#[enum_dispatch]
pub trait StepRuleOps {
    /// Decides acceptance from the exact merit at the iterate, the exact
    /// merit at the trial point, and the model merit of the trial step.
    fn apply(
        &mut self,
        iterate_merit: E,
        trial_exact_merit: E,
        trial_model_merit: E,
    ) -> Result<StepResult>;

    fn reset(&mut self);
}

#[enum_dispatch(StepRuleOps)]
pub enum StepRule {
    Direct(DirectStepRule),
    Window(WindowStepRule),
    Minstep(MinstepStepRule),
}

impl StepRule {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.step_rule {
            StepRuleType::Direct => StepRule::Direct(DirectStepRule {
                accepted_reduction: settings.accepted_reduction,
            }),
            StepRuleType::Window => StepRule::Window(WindowStepRule {
                accepted_reduction: settings.accepted_reduction,
                window: VecDeque::with_capacity(WINDOW_SIZE),
            }),
            StepRuleType::Minstep => StepRule::Minstep(MinstepStepRule {
                accepted_reduction: settings.accepted_reduction,
                step_count: MINSTEP_COUNT,
                reference: None,
                remaining: MINSTEP_COUNT,
            }),
        }
    }
}

/// Acceptance is tested multiplicatively (`actual >= eta * predicted`) so
/// that vanishing steps at a solution are accepted rather than producing a
/// `0/0` ratio; the ratio itself is only reported.
fn evaluate_reduction(
    reference_merit: E,
    trial_exact_merit: E,
    predicted_reduction: E,
    accepted_reduction: E,
) -> StepResult {
    let actual_reduction = reference_merit - trial_exact_merit;

    let reduction_ratio = if predicted_reduction != 0. {
        actual_reduction / predicted_reduction
    } else if actual_reduction > 0. {
        E::INFINITY
    } else if actual_reduction == 0. {
        1.
    } else {
        E::NEG_INFINITY
    };

    StepResult {
        accept_step: actual_reduction >= accepted_reduction * predicted_reduction,
        reduction_ratio,
    }
}

/// Accepts iff the reduction ratio against the current merit exceeds the
/// threshold.
pub struct DirectStepRule {
    accepted_reduction: E,
}

impl StepRuleOps for DirectStepRule {
    fn apply(
        &mut self,
        iterate_merit: E,
        trial_exact_merit: E,
        trial_model_merit: E,
    ) -> Result<StepResult> {
        let predicted = iterate_merit - trial_model_merit;

        Ok(evaluate_reduction(
            iterate_merit,
            trial_exact_merit,
            predicted,
            self.accepted_reduction,
        ))
    }

    fn reset(&mut self) {}
}

/// Non-monotone acceptance against the maximum merit over a trailing
/// window of accepted iterates.
pub struct WindowStepRule {
    accepted_reduction: E,
    window: VecDeque<E>,
}

impl StepRuleOps for WindowStepRule {
    fn apply(
        &mut self,
        iterate_merit: E,
        trial_exact_merit: E,
        trial_model_merit: E,
    ) -> Result<StepResult> {
        let reference = self
            .window
            .iter()
            .copied()
            .fold(iterate_merit, E::max);

        let predicted = iterate_merit - trial_model_merit;

        let result = evaluate_reduction(
            reference,
            trial_exact_merit,
            predicted,
            self.accepted_reduction,
        );

        if result.accept_step {
            if self.window.len() == WINDOW_SIZE {
                self.window.pop_front();
            }

            self.window.push_back(iterate_merit);
        }

        Ok(result)
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Acceptance against a reference anchored to the minimum merit
/// encountered, refreshed every `step_count` accepted steps.
pub struct MinstepStepRule {
    accepted_reduction: E,
    step_count: I,
    reference: Option<E>,
    remaining: I,
}

impl StepRuleOps for MinstepStepRule {
    fn apply(
        &mut self,
        iterate_merit: E,
        trial_exact_merit: E,
        trial_model_merit: E,
    ) -> Result<StepResult> {
        let reference = match self.reference {
            Some(reference) => reference.min(iterate_merit),
            None => iterate_merit,
        };

        let predicted = iterate_merit - trial_model_merit;

        let result = evaluate_reduction(
            reference,
            trial_exact_merit,
            predicted,
            self.accepted_reduction,
        );

        if result.accept_step {
            if self.remaining == 0 {
                self.reference = Some(trial_exact_merit);
                self.remaining = self.step_count;
            } else {
                self.reference = Some(reference);
                self.remaining -= 1;
            }
        }

        Ok(result)
    }

    fn reset(&mut self) {
        self.reference = None;
        self.remaining = self.step_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_rule() {
        let settings = Settings::default();
        let mut rule = StepRule::from_settings(&settings);

        // predicted reduction 1, actual reduction 0.5
        let result = rule.apply(10., 9.5, 9.).unwrap();
        assert!(result.accept_step);
        assert!((result.reduction_ratio - 0.5).abs() < 1e-14);

        // actual increase
        let result = rule.apply(10., 10.5, 9.).unwrap();
        assert!(!result.accept_step);
    }

    #[test]
    fn test_window_rule_is_nonmonotone() {
        let mut settings = Settings::default();
        settings.step_rule = StepRuleType::Window;

        let mut rule = StepRule::from_settings(&settings);

        // Accept a first step with merit 10
        assert!(rule.apply(10., 9., 9.).unwrap().accept_step);

        // From merit 9, a slight increase to 9.5 is still acceptable
        // against the window maximum of 10
        let result = rule.apply(9., 9.5, 8.5).unwrap();
        assert!(result.accept_step);

        // The direct rule would have rejected the same step
        let mut direct = StepRule::from_settings(&Settings::default());
        assert!(!direct.apply(9., 9.5, 8.5).unwrap().accept_step);
    }

    #[test]
    fn test_minstep_rule_tracks_minimum() {
        let mut settings = Settings::default();
        settings.step_rule = StepRuleType::Minstep;

        let mut rule = StepRule::from_settings(&settings);

        assert!(rule.apply(10., 9., 9.).unwrap().accept_step);

        // Reference stays at the minimum seen so far
        let result = rule.apply(9., 8.9, 8.5).unwrap();
        assert!(result.accept_step);
    }
}
