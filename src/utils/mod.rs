//! Helper utilities and macros.

#[macro_use]
mod print;

mod error;

pub use error::ParlogError;
