//! Error types for introspection coordinator operations.

use crate::identity::NodeUuid;
use thiserror::Error;

/// Status class an error implies for an eventual HTTP-facing layer, without
/// this crate depending on any HTTP framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    NotFound,
    BadRequest,
    InternalError,
}

/// Core errors: identity resolution, lock registry, node cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("node not found: {uuid}")]
    NotFound { uuid: NodeUuid },

    #[error("node not found in cache matching supplied attributes")]
    NotFoundInCache,

    #[error("lookup matched more than one node")]
    AmbiguousLookup,

    #[error("attribute {name}={value} already belongs to another active node")]
    DuplicateAttribute { name: String, value: String },

    #[error("node {uuid} is already finished")]
    AlreadyFinished { uuid: NodeUuid },

    #[error("node {uuid} is locked by another process")]
    Locked { uuid: NodeUuid },

    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
}

/// Storage-layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("node not found: {uuid}")]
    NotFound { uuid: NodeUuid },

    #[error("insert failed for node {uuid}: {reason}")]
    InsertFailed { uuid: NodeUuid, reason: String },

    #[error("update failed for node {uuid}: {reason}")]
    UpdateFailed { uuid: NodeUuid, reason: String },

    #[error("rule write failed: {reason}")]
    RuleWriteFailed { reason: String },

    #[error("transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("query failed: {reason}")]
    QueryFailed { reason: String },
}

/// Rules-engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RulesError {
    #[error("unknown condition operator: {op}")]
    UnknownCondition { op: String },

    #[error("unknown action: {name}")]
    UnknownAction { name: String },

    #[error("missing required parameter '{param}' for {plugin}")]
    MissingParam { plugin: String, param: String },

    #[error("parameter '{param}' may not be null for {plugin}")]
    ParamMayNotBeNull { plugin: String, param: String },

    #[error("field path could not be resolved: {path}")]
    UnresolvedField { path: String },

    #[error("rule action failed: {message}")]
    Fail { message: String },
}

/// Processing-pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error("processing hook '{hook}' failed: {reason}")]
    HookFailure { hook: String, reason: String },

    /// Aggregated pre-hook failures, collected rather than raised as soon
    /// as the first hook fails (pre-hooks run best-effort; the submission
    /// is rejected only once every pre-hook has had a chance to run).
    #[error("processing failed: {reasons:?}")]
    ProcessingFailed { reasons: Vec<String> },

    #[error("external service error: {reason}")]
    ExternalServiceError { reason: String },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("operation canceled: {reason}")]
    Canceled { reason: String },
}

impl PipelineError {
    /// The HTTP-status-class implied by this error, for an eventual REST
    /// layer to consume.
    pub fn status_class(&self) -> StatusClass {
        match self {
            PipelineError::Core(CoreError::NotFound { .. })
            | PipelineError::Core(CoreError::NotFoundInCache)
            | PipelineError::Core(CoreError::AmbiguousLookup) => StatusClass::NotFound,
            PipelineError::Core(CoreError::DuplicateAttribute { .. })
            | PipelineError::Core(CoreError::AlreadyFinished { .. })
            | PipelineError::Core(CoreError::Locked { .. }) => StatusClass::BadRequest,
            PipelineError::Core(CoreError::InvalidConfig { .. }) => StatusClass::InternalError,
            PipelineError::Rules(_) => StatusClass::BadRequest,
            PipelineError::HookFailure { .. } => StatusClass::InternalError,
            PipelineError::ProcessingFailed { .. } => StatusClass::BadRequest,
            PipelineError::ExternalServiceError { .. } => StatusClass::InternalError,
            PipelineError::Timeout { .. } => StatusClass::InternalError,
            PipelineError::Canceled { .. } => StatusClass::BadRequest,
        }
    }
}

/// Master error type aggregating every layer.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Result type alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn not_found_maps_to_not_found_class() {
        let err = PipelineError::Core(CoreError::NotFound {
            uuid: NodeUuid::new(Uuid::nil()),
        });
        assert_eq!(err.status_class(), StatusClass::NotFound);
    }

    #[test]
    fn already_finished_maps_to_bad_request_class() {
        let err = PipelineError::Core(CoreError::AlreadyFinished {
            uuid: NodeUuid::new(Uuid::nil()),
        });
        assert_eq!(err.status_class(), StatusClass::BadRequest);
    }

    #[test]
    fn hook_failure_maps_to_internal_error_class() {
        let err = PipelineError::HookFailure {
            hook: "capabilities".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.status_class(), StatusClass::InternalError);
    }

    #[test]
    fn coordinator_error_wraps_each_layer_via_from() {
        let core: CoordinatorError = CoreError::NotFoundInCache.into();
        assert!(matches!(core, CoordinatorError::Core(_)));

        let storage: CoordinatorError = StorageError::LockPoisoned.into();
        assert!(matches!(storage, CoordinatorError::Storage(_)));

        let rules: CoordinatorError = RulesError::UnknownAction {
            name: "bogus".into(),
        }
        .into();
        assert!(matches!(rules, CoordinatorError::Rules(_)));
    }
}
