//! Error types for the PLC mirror bridge.

use std::io;
use thiserror::Error;

/// Result type alias for PLC bridge operations.
pub type Result<T> = std::result::Result<T, PlcError>;

/// Errors that can occur while mirroring, reading or writing PLC memory.
#[derive(Debug, Error)]
pub enum PlcError {
    /// Socket-level failure. Triggers disconnect and FAULT handling in the
    /// poll scheduler.
    #[error("Connection error: {reason}")]
    Connection {
        /// Description of the transport failure.
        reason: String,
    },

    /// The peer closed the stream mid-transfer.
    #[error("Connection shut down by peer")]
    Shutdown,

    /// A received frame failed checker validation after bounded retries.
    /// Recoverable: the frame is discarded and the read retried.
    #[error("Protocol desync: {reason}")]
    ProtocolDesync {
        /// Description of the validation failure.
        reason: String,
    },

    /// A write was attempted without holding the control lock.
    #[error("Write not permitted: {reason}")]
    WriteNotPermitted {
        /// Why the write was refused.
        reason: String,
    },

    /// An attribute name could not be resolved through the registry.
    #[error("Unknown attribute '{name}'")]
    UnknownAttribute {
        /// The name that failed to resolve.
        name: String,
    },

    /// A formula failed to parse or evaluate. Degrades the single attribute
    /// to INVALID quality, never the whole poll cycle.
    #[error("Formula error: {reason}")]
    FormulaEval {
        /// Description of the parse or evaluation failure.
        reason: String,
    },

    /// A write formula vetoed the value. Carries a user-facing message.
    #[error("Write rejected: {message}")]
    WriteRejected {
        /// User-facing explanation from the formula guard.
        message: String,
    },

    /// Malformed configuration detected at construction time. The affected
    /// attribute is not built and the error is not retried.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration defect.
        reason: String,
    },

    /// Communication timeout while waiting for PLC data.
    #[error("Communication timeout")]
    Timeout,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PlcError {
    /// Creates a new `Connection` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_mirror::PlcError;
    ///
    /// let err = PlcError::connection("connect refused by 10.0.5.12:2000");
    /// ```
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Creates a new `ProtocolDesync` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_mirror::PlcError;
    ///
    /// let err = PlcError::desync("checker mismatch at address 42");
    /// ```
    pub fn desync(reason: impl Into<String>) -> Self {
        Self::ProtocolDesync {
            reason: reason.into(),
        }
    }

    /// Creates a new `WriteNotPermitted` error.
    pub fn write_not_permitted(reason: impl Into<String>) -> Self {
        Self::WriteNotPermitted {
            reason: reason.into(),
        }
    }

    /// Creates a new `UnknownAttribute` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_mirror::PlcError;
    ///
    /// let err = PlcError::unknown_attribute("GUN_HV_Setpoint");
    /// ```
    pub fn unknown_attribute(name: impl Into<String>) -> Self {
        Self::UnknownAttribute { name: name.into() }
    }

    /// Creates a new `FormulaEval` error.
    pub fn formula(reason: impl Into<String>) -> Self {
        Self::FormulaEval {
            reason: reason.into(),
        }
    }

    /// Creates a new `WriteRejected` error with a user-facing message.
    pub fn write_rejected(message: impl Into<String>) -> Self {
        Self::WriteRejected {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns whether this error is recoverable by the poll scheduler's
    /// retry/reconnect logic (as opposed to a per-attribute or config error).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Shutdown | Self::Timeout | Self::Io(_)
        )
    }
}
