//! Errors surfaced by rule validation and evaluation.

use introspector_core::RuleUuid;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RulesError {
    #[error("unknown condition operator '{op}'")]
    UnknownCondition { op: String },

    #[error("unknown action '{action}'")]
    UnknownAction { action: String },

    #[error("condition '{op}' is missing required parameter '{param}'")]
    MissingConditionParam { op: String, param: String },

    #[error("action '{action}' is missing required parameter '{param}'")]
    MissingActionParam { action: String, param: String },

    #[error("invalid parameter for condition '{op}': {reason}")]
    InvalidConditionParam { op: String, reason: String },

    #[error("rule {uuid} aborted processing: {message}")]
    Aborted { uuid: Option<RuleUuid>, message: String },

    #[error("field path '{path}' is malformed: {reason}")]
    MalformedFieldPath { path: String, reason: String },

    #[error("action could not be applied: {reason}")]
    ActionFailed { reason: String },
}

pub type RulesResult<T> = Result<T, RulesError>;
