//! Customized unified error type.

use std::fmt;
use std::io;

/// Customized error type for parlog.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParlogError {
    /// Backend I/O failure from the storage adapter.
    Storage(String),

    /// An invariant the log relies on does not hold, e.g. an entry below
    /// the saved index is missing or the stored entry count is off.
    Inconsistent(String),

    /// Latest-read attempted before the reconciler has run.
    NotInitialized,

    /// Another live process owns this member's storage rows.
    AlreadyOwned(String),

    /// Shutdown in progress.
    Cancelled,

    /// Malformed configuration input.
    Config(String),
}

impl fmt::Display for ParlogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParlogError::Storage(s) => write!(f, "storage: {}", s),
            ParlogError::Inconsistent(s) => write!(f, "inconsistent: {}", s),
            ParlogError::NotInitialized => {
                write!(f, "saved index has not been initialized yet")
            }
            ParlogError::AlreadyOwned(s) => write!(f, "already owned: {}", s),
            ParlogError::Cancelled => write!(f, "cancelled"),
            ParlogError::Config(s) => write!(f, "config: {}", s),
        }
    }
}

impl std::error::Error for ParlogError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from common error types to a `ParlogError` kind.
macro_rules! impl_from_error {
    ($error:ty => $kind:ident) => {
        impl From<$error> for ParlogError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ParlogError::$kind(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error => Storage);
impl_from_error!(rmp_serde::encode::Error => Storage);
impl_from_error!(rmp_serde::decode::Error => Storage);
impl_from_error!(toml::de::Error => Config);
