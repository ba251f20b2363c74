//! Error taxonomy for the codec core.

use thiserror::Error;

/// Sub-kinds of a malformed codestream, per the marker-layer failure
/// taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedCodestream {
    #[error("required marker {0} is missing")]
    MissingMarker(&'static str),
    #[error("marker {found} encountered where {expected} was expected")]
    BadMarkerOrder {
        expected: &'static str,
        found: String,
    },
    #[error("marker segment length field does not match its content")]
    BadLength,
    #[error("unknown marker 0xFF{0:02X} encountered in strict mode")]
    UnknownMarker(u8),
}

/// The codec-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum J2kError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("malformed codestream: {0}")]
    MalformedCodestream(#[from] MalformedCodestream),

    #[error("tier-1 entropy decoder detected inconsistency: {0}")]
    Tier1Corrupt(String),

    #[error("quantised coefficient out of representable range: {0}")]
    QuantizerOverflow(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("rate allocator could not meet requested bitrate: {0}")]
    BudgetExhausted(String),
}

pub type Result<T> = std::result::Result<T, J2kError>;

impl J2kError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub fn missing_marker(name: &'static str) -> Self {
        Self::MalformedCodestream(MalformedCodestream::MissingMarker(name))
    }

    pub fn bad_marker_order(expected: &'static str, found: impl Into<String>) -> Self {
        Self::MalformedCodestream(MalformedCodestream::BadMarkerOrder {
            expected,
            found: found.into(),
        })
    }
}
