//! Domain failures raised by the pure calculators and the transition table
//!
//! Messages are complete sentences in English with their Spanish counterpart,
//! so the boundary can show either one to the operator unmodified.

use serde::Serialize;
use thiserror::Error;

use crate::types::Language;

/// Caller-supplied data violates a domain invariant
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ValidationError {
    /// Offending input field, when one can be named
    pub field: Option<String>,
    pub message: String,
    pub message_es: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, message_es: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
            message_es: message_es.into(),
        }
    }

    pub fn on_field(
        field: impl Into<String>,
        message: impl Into<String>,
        message_es: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            message_es: message_es.into(),
        }
    }

    pub fn message_for(&self, language: Language) -> &str {
        match language {
            Language::Spanish => &self.message_es,
            Language::English => &self.message,
        }
    }
}

/// A fumigation state-machine precondition failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct TransitionError {
    pub message: String,
    pub message_es: String,
}

impl TransitionError {
    pub fn new(message: impl Into<String>, message_es: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_es: message_es.into(),
        }
    }

    pub fn message_for(&self, language: Language) -> &str {
        match language {
            Language::Spanish => &self.message_es,
            Language::English => &self.message,
        }
    }
}
