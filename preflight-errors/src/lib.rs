//! Structured errors shared across the preflight crates.
//!
//! Ported from the source's `api/errors` package: every core operation
//! returns a status code, an internal message meant for logs, and an
//! external message meant for callers. Context is added by prepending as
//! the error crosses layers; only the external message ever reaches a
//! public-facing caller.

use std::fmt;

/// The seven error kinds named in the scheduling core's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 400: malformed request payload.
    Validation,
    /// 401: bad password, bad/expired/insufficient token, unknown node secret.
    Unauthorized,
    /// 404: user/checklist/token id not in store.
    NotFound,
    /// 409: duplicate email or checklist name.
    Conflict,
    /// 422: unparseable weekday or time-of-day string.
    Unprocessable,
    /// 424: IANA timezone not found.
    UnmetDependency,
    /// 500: RNG, persistence, marshalling, external-service failures.
    Internal,
}

impl ErrorKind {
    /// The HTTP status code this kind maps to.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unprocessable => 422,
            ErrorKind::UnmetDependency => 424,
            ErrorKind::Internal => 500,
        }
    }
}

/// A structured error carrying a status, an internal (log-facing) message,
/// and an external (caller-facing) message.
#[derive(Debug, Clone)]
pub struct PreflightError {
    pub kind: ErrorKind,
    pub internal_message: String,
    pub external_message: String,
}

impl PreflightError {
    pub fn new(kind: ErrorKind, internal_message: impl Into<String>, external_message: impl Into<String>) -> Self {
        Self {
            kind,
            internal_message: internal_message.into(),
            external_message: external_message.into(),
        }
    }

    /// Shorthand for errors whose internal and external messages coincide.
    pub fn simple(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(kind, message.clone(), message)
    }

    /// Prepend additional context to the internal message as the error
    /// propagates up through a caller. Mirrors `PreflightError.Prepend` in
    /// the source, reworked as a consuming builder instead of a pointer
    /// mutation.
    pub fn context(mut self, line: impl Into<String>) -> Self {
        self.internal_message = format!("{}\n\t{}", line.into(), self.internal_message);
        self
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.external_message)
    }
}

impl std::error::Error for PreflightError {}

/// Extension trait for adding context to any `Result<T, PreflightError>`.
pub trait Context<T> {
    fn context(self, line: impl Into<String>) -> Result<T, PreflightError>;
}

impl<T> Context<T> for Result<T, PreflightError> {
    fn context(self, line: impl Into<String>) -> Result<T, PreflightError> {
        self.map_err(|e| e.context(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ErrorKind::Validation.status(), 400);
        assert_eq!(ErrorKind::Unauthorized.status(), 401);
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::Conflict.status(), 409);
        assert_eq!(ErrorKind::Unprocessable.status(), 422);
        assert_eq!(ErrorKind::UnmetDependency.status(), 424);
        assert_eq!(ErrorKind::Internal.status(), 500);
    }

    #[test]
    fn context_prepends_and_keeps_external_message_stable() {
        let err = PreflightError::simple(ErrorKind::NotFound, "token not found")
            .context("security.delete_token: error:");
        assert_eq!(err.internal_message, "security.delete_token: error:\n\ttoken not found");
        assert_eq!(err.external_message, "token not found");
        assert_eq!(err.to_string(), "token not found");
    }
}
