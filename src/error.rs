use std::fmt::Write;
use thiserror::Error;

/// Formats an error and its entire source chain with each error on a new line.
///
/// ```text
/// Error message
///   Caused by: First cause
///   Caused by: Second cause
/// ```
pub fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut output = String::new();
    write!(&mut output, "{}", err).ok();

    let mut source = err.source();
    while let Some(err) = source {
        write!(&mut output, "\n  Caused by: {}", err).ok();
        source = err.source();
    }

    output
}

/// Formats an anyhow::Error with its full chain.
pub fn format_anyhow_chain(err: &anyhow::Error) -> String {
    let mut output = String::new();
    let chain: Vec<_> = err.chain().collect();

    if let Some((first, rest)) = chain.split_first() {
        write!(&mut output, "{}", first).ok();
        for cause in rest {
            write!(&mut output, "\n  Caused by: {}", cause).ok();
        }
    }

    output
}

/// The three error kinds from the error-handling design (§7): how the
/// dispatcher should react to a reconciler returning this error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// API conflict, temporary unavailability, lister miss: re-enqueue with backoff.
    Transient,
    /// Ownership conflict, unmet requirement, invalid strategy: surface on the
    /// object's status; only re-enqueue on an observed object change.
    Policy,
    /// Cannot reach the API server at all: exit the process for a supervisor restart.
    Fatal,
}

/// Central reconciliation error type shared by every controller in this crate.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("install strategy could not be parsed: {0}")]
    InvalidStrategy(String),

    #[error("ownership conflict: {0}")]
    OwnershipConflict(String),

    #[error("requirement not met: {0}")]
    RequirementNotMet(String),

    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("status write failed after reconciliation: {reconcile_error}; status error: {status_error}")]
    StatusWriteFailed {
        reconcile_error: Box<ReconcileError>,
        status_error: Box<ReconcileError>,
    },

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),

    /// The Kubernetes API server could not be reached at startup; not
    /// returned by any reconciler, only by client construction in the
    /// dispatcher.
    #[error("cannot reach the Kubernetes API server: {0}")]
    ClientUnavailable(String),
}

impl ReconcileError {
    /// Classifies this error per the error-handling design in §7.
    pub fn classification(&self) -> ErrorClass {
        match self {
            ReconcileError::Kube(_) => ErrorClass::Transient,
            ReconcileError::StatusWriteFailed { .. } => ErrorClass::Transient,
            ReconcileError::InvalidStrategy(_)
            | ReconcileError::OwnershipConflict(_)
            | ReconcileError::RequirementNotMet(_) => ErrorClass::Policy,
            ReconcileError::MalformedObject(_) => ErrorClass::Policy,
            ReconcileError::Other(_) => ErrorClass::Transient,
            ReconcileError::ClientUnavailable(_) => ErrorClass::Fatal,
        }
    }

    /// Chains an error encountered while writing status onto the reconciliation
    /// error that triggered the write, per §7 ("errors encountered while writing
    /// status are themselves transient; the reconciler chains both").
    pub fn with_status_write_failure(self, status_error: ReconcileError) -> Self {
        ReconcileError::StatusWriteFailed {
            reconcile_error: Box::new(self),
            status_error: Box::new(status_error),
        }
    }

    /// Human-readable message suitable for a status condition.
    pub fn to_condition_message(&self) -> String {
        format_error_chain(self)
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_do_not_retry_storm() {
        let err = ReconcileError::RequirementNotMet("widgets.example.com absent".into());
        assert_eq!(err.classification(), ErrorClass::Policy);
    }

    #[test]
    fn client_unavailable_is_fatal() {
        let err = ReconcileError::ClientUnavailable("connection refused".into());
        assert_eq!(err.classification(), ErrorClass::Fatal);
    }

    #[test]
    fn status_write_failure_chains_both_errors() {
        let original = ReconcileError::OwnershipConflict("deployment/foo".into());
        let write_err = ReconcileError::Other(anyhow::anyhow!("conflict on status update"));
        let combined = original.with_status_write_failure(write_err);
        assert_eq!(combined.classification(), ErrorClass::Transient);
        assert!(combined.to_string().contains("deployment/foo"));
    }
}
