//! Error plumbing between the rules/adapter crates and the shared
//! [`PipelineError`] enum.

use introspector_core::{PipelineError, RulesError as CoreRulesError};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Folds the richer rules-engine error into the core crate's narrower
/// `RulesError`, the same four buckets the original's rule plugins raise
/// into (unknown op, unknown action, missing param, and the `fail` action's
/// abort).
pub fn map_rules_error(err: introspector_rules::RulesError) -> PipelineError {
    use introspector_rules::RulesError as RE;

    let core_err = match err {
        RE::UnknownCondition { op } => CoreRulesError::UnknownCondition { op },
        RE::UnknownAction { action } => CoreRulesError::UnknownAction { name: action },
        RE::MissingConditionParam { op, param } => CoreRulesError::MissingParam { plugin: op, param },
        RE::MissingActionParam { action, param } => {
            CoreRulesError::MissingParam { plugin: action, param }
        }
        RE::InvalidConditionParam { op, reason } => {
            CoreRulesError::UnresolvedField { path: format!("{op}: {reason}") }
        }
        RE::MalformedFieldPath { path, reason } => {
            CoreRulesError::UnresolvedField { path: format!("{path}: {reason}") }
        }
        RE::Aborted { message, .. } => CoreRulesError::Fail { message },
        RE::ActionFailed { reason } => CoreRulesError::UnresolvedField { path: reason },
    };
    PipelineError::Rules(core_err)
}

/// Adapter failures (bare-metal service, object store, ramdisk logs) all
/// surface to the pipeline as an external-service error.
pub fn map_adapter_error(err: introspector_adapters::AdapterError) -> PipelineError {
    PipelineError::ExternalServiceError { reason: err.to_string() }
}

/// Storage failures surface to the pipeline as an external-service error,
/// the way a database outage would to the original's transaction context.
pub fn map_storage_error(err: introspector_core::StorageError) -> PipelineError {
    PipelineError::ExternalServiceError { reason: err.to_string() }
}
