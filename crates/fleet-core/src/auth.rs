//! Session boundary
//!
//! The core performs no authentication. Every public operation takes a
//! reference to an [`AuthenticatedPrincipal`], which can only be produced by
//! the session layer after it has validated the caller.

use serde::Serialize;

/// Proof that the session layer validated the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedPrincipal {
    subject: String,
}

impl AuthenticatedPrincipal {
    /// Create a principal for a caller the session layer has already validated
    pub fn from_session(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
