use std::future::Future;

use tracing::{debug, info, instrument, warn};

use super::StageName;
use super::stages::StageSpec;
use super::state::{AgentState, validate_successor};
use crate::error::StageError;
use crate::model::Tier;

/// One failed tier attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TierFailure {
    pub tier: Tier,
    pub error: StageError,
}

/// Outcome of running a stage through its tiers.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// The accepted successor, or a copy of the prior state if every tier failed.
    pub state: AgentState,
    /// Tier whose output was accepted.
    pub tier: Option<Tier>,
    pub failures: Vec<TierFailure>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.tier.is_some()
    }

    pub fn degraded(&self) -> bool {
        self.succeeded() && !self.failures.is_empty()
    }
}

/// Runs a stage's tiers strictly in order until one yields a valid successor.
///
/// Each attempt gets a fresh copy of the prior state and the stage timeout.
/// There is no retry within a tier.
pub struct DegradationController;

impl DegradationController {
    #[instrument(skip_all, fields(stage = %spec.name))]
    pub async fn attempt<F, Fut>(spec: &StageSpec, prior: &AgentState, mut run: F) -> Attempt
    where
        F: FnMut(Tier, AgentState) -> Fut,
        Fut: Future<Output = Result<AgentState, StageError>>,
    {
        let mut failures: Vec<TierFailure> = Vec::new();

        for &tier in spec.tiers {
            debug!(%tier, "attempting tier");
            let outcome = match tokio::time::timeout(spec.timeout, run(tier, prior.clone())).await {
                Ok(Ok(next)) => validate_successor(prior, &next)
                    .map(|()| next)
                    .map_err(StageError::from),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(StageError::Timeout(spec.timeout)),
            };

            match outcome {
                Ok(mut next) => {
                    Self::record(&mut next, spec.name, tier, failures.first());
                    if failures.is_empty() {
                        debug!(%tier, "stage completed");
                    } else {
                        info!(%tier, failed_tiers = failures.len(), "stage completed in degraded mode");
                    }
                    return Attempt {
                        state: next,
                        tier: Some(tier),
                        failures,
                    };
                }
                Err(error) => {
                    warn!(%tier, %error, "tier failed");
                    failures.push(TierFailure { tier, error });
                }
            }
        }

        let mut state = prior.clone();
        if let Some(first) = failures.first() {
            state.stage_errors.insert(
                spec.name.to_string(),
                first.error.to_info(spec.name, Some(first.tier)),
            );
        }
        warn!(attempts = failures.len(), "all tiers failed");
        Attempt {
            state,
            tier: None,
            failures,
        }
    }

    /// Records the chosen tier and, if earlier tiers failed, the first failure.
    fn record(state: &mut AgentState, stage: StageName, tier: Tier, first: Option<&TierFailure>) {
        state.stage_tiers.entry(stage.to_string()).or_insert(tier);
        if let Some(failure) = first {
            let mut info = failure.error.to_info(stage, Some(failure.tier));
            info.resolved_by = Some(tier);
            state.stage_errors.insert(stage.to_string(), info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, ValidationError};
    use crate::model::{ErrorKind, Topic};
    use std::collections::BTreeSet;
    use std::time::Duration;

    const TIERS: &[Tier] = &[Tier::Enhanced, Tier::Template, Tier::Emergency];

    fn spec() -> StageSpec {
        StageSpec {
            name: StageName::GenerateNotes,
            required: false,
            tiers: TIERS,
            timeout: Duration::from_millis(100),
        }
    }

    fn prior() -> AgentState {
        let mut state = AgentState::new("doc.md");
        state.raw_text = "body".into();
        state
    }

    fn with_topic(mut state: AgentState, title: &str) -> AgentState {
        state.topics.push(Topic {
            title: title.into(),
            description: String::new(),
            key_terms: BTreeSet::new(),
            order: state.topics.len(),
            level: 1,
            page: 1,
            parent: None,
            offset: 0,
        });
        state
    }

    #[tokio::test]
    async fn first_tier_success_records_no_error() {
        let attempt = DegradationController::attempt(&spec(), &prior(), |_, s| async move {
            Ok(with_topic(s, "Intro"))
        })
        .await;
        assert_eq!(attempt.tier, Some(Tier::Enhanced));
        assert!(!attempt.degraded());
        assert!(attempt.state.stage_errors.is_empty());
        assert_eq!(attempt.state.stage_tiers["generate_notes"], Tier::Enhanced);
    }

    #[tokio::test]
    async fn falls_back_and_records_first_failure() {
        let attempt = DegradationController::attempt(&spec(), &prior(), |tier, s| async move {
            match tier {
                Tier::Enhanced => Err(GenerationError::Unavailable("disabled".into()).into()),
                _ => Ok(with_topic(s, "Intro")),
            }
        })
        .await;
        assert_eq!(attempt.tier, Some(Tier::Template));
        assert!(attempt.degraded());
        let info = &attempt.state.stage_errors["generate_notes"];
        assert_eq!(info.kind, ErrorKind::Generation);
        assert_eq!(info.tier, Some(Tier::Enhanced));
        assert_eq!(info.resolved_by, Some(Tier::Template));
        assert_eq!(attempt.state.stage_tiers["generate_notes"], Tier::Template);
    }

    #[tokio::test]
    async fn invalid_output_counts_as_failure() {
        let attempt = DegradationController::attempt(&spec(), &prior(), |tier, mut s| async move {
            if tier == Tier::Enhanced {
                s.raw_text = "rewritten".into();
            }
            Ok(s)
        })
        .await;
        assert_eq!(attempt.tier, Some(Tier::Template));
        assert!(matches!(
            attempt.failures[0].error,
            StageError::Validation(ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let attempt = DegradationController::attempt(&spec(), &prior(), |tier, s| async move {
            if tier == Tier::Enhanced {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(s)
        })
        .await;
        assert_eq!(attempt.tier, Some(Tier::Template));
        assert_eq!(
            attempt.failures[0].error,
            StageError::Timeout(Duration::from_millis(100))
        );
        assert_eq!(
            attempt.state.stage_errors["generate_notes"].kind,
            ErrorKind::Timeout
        );
    }

    #[tokio::test]
    async fn exhaustion_preserves_prior_state() {
        let before = with_topic(prior(), "Kept");
        let attempt = DegradationController::attempt(&spec(), &before, |_, _| async {
            Err(StageError::Internal("nope".into()))
        })
        .await;
        assert!(!attempt.succeeded());
        assert_eq!(attempt.failures.len(), 3);
        assert_eq!(attempt.state.topics, before.topics);
        assert_eq!(
            attempt.state.stage_errors["generate_notes"].tier,
            Some(Tier::Enhanced)
        );
        assert!(attempt.state.stage_tiers.is_empty());
    }

    #[tokio::test]
    async fn tiers_run_in_order_once_each() {
        let mut seen = Vec::new();
        DegradationController::attempt(&spec(), &prior(), |tier, _| {
            seen.push(tier);
            async { Err(StageError::Internal("x".into())) }
        })
        .await;
        assert_eq!(seen, vec![Tier::Enhanced, Tier::Template, Tier::Emergency]);
    }
}
