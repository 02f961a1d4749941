use serde::{Deserialize, Serialize};

/// Stable error kinds surfaced across the public API (spec.md §7). Every
/// crate boundary maps its own error enum onto one of these before it
/// crosses into `aiops-server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("validation error")]
    ValidationError,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("rate limited")]
    RateLimited,
    #[error("in cooldown")]
    InCooldown,
    #[error("blackout window active")]
    Blackout,
    #[error("template resolution failed")]
    TemplateResolution,
    #[error("executor failure")]
    ExecutorFailure,
    #[error("timeout")]
    Timeout,
    #[error("internal error")]
    InternalError,
}

impl ErrorKind {
    /// HTTP status code per spec.md §7.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::ValidationError => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::CircuitOpen
            | ErrorKind::RateLimited
            | ErrorKind::InCooldown
            | ErrorKind::Blackout => 423,
            ErrorKind::TemplateResolution => 422,
            ErrorKind::ExecutorFailure => 500,
            ErrorKind::Timeout => 504,
            ErrorKind::InternalError => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_gate_denials_use_423() {
        for kind in [
            ErrorKind::CircuitOpen,
            ErrorKind::RateLimited,
            ErrorKind::InCooldown,
            ErrorKind::Blackout,
        ] {
            assert_eq!(kind.http_status(), 423);
        }
    }
}
