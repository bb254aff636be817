use crate::error::tq_error_enums::*;
use std::fmt;

#[derive(Debug)]
pub struct TqError {
    pub kind: TqErrorKind,
    pub message: String,
}

impl TqError {
    pub fn new(kind: TqErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn new_with_kind_only(kind: TqErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    /// Maps the error to the HTTP status code a proxy path should answer the
    /// client with.
    pub fn get_http_status_code(&self) -> u16 {
        match &self.kind {
            TqErrorKind::UpstreamDial(_) => 502,
            TqErrorKind::HealthTimeout => 503,
            TqErrorKind::PortExhausted => 503,
            TqErrorKind::Registry(RegistryError::NoRouteMatched) => 404,
            _ => 500,
        }
    }
}

impl fmt::Display for TqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TqError {}
