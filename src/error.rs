//! Errors surfaced to the host.

use thiserror::Error;

use crate::host::Value;

/// Errors returned by clock construction and the host-facing surface.
///
/// Every error leaves the clock exactly as it was: operands are checked
/// before any session state is captured.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    /// A configuration field the clock needs is missing or not numeric
    #[error("configuration field `{field}` must be a number, found {found}")]
    Config {
        field: &'static str,
        found: Value,
    },

    /// An operand passed to a clock operation was unusable
    #[error("invalid operand `{name}`: {found}")]
    InvalidOperand {
        name: &'static str,
        found: Value,
    },

    /// The clock was never started or has already been stopped
    #[error("clock is not running")]
    Unavailable,
}

pub type ClockResult<T> = Result<T, ClockError>;
