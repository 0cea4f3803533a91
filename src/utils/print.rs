//! Helper macros for logging, tagging every line with the member id.

/// Log TRACE message tagged with a member id.
///
/// Example:
/// ```no_run
/// use parlog::pl_trace;
/// let member = 0;
/// let msg = "hello";
/// pl_trace!(member; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pl_trace {
    ($member:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::trace!(concat!("[{}] ", $fmt_str), $member $(, $fmt_arg)*)
    };
}

/// Log DEBUG message tagged with a member id.
#[macro_export]
macro_rules! pl_debug {
    ($member:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::debug!(concat!("[{}] ", $fmt_str), $member $(, $fmt_arg)*)
    };
}

/// Log INFO message tagged with a member id.
#[macro_export]
macro_rules! pl_info {
    ($member:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::info!(concat!("[{}] ", $fmt_str), $member $(, $fmt_arg)*)
    };
}

/// Log WARN message tagged with a member id.
#[macro_export]
macro_rules! pl_warn {
    ($member:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::warn!(concat!("[{}] ", $fmt_str), $member $(, $fmt_arg)*)
    };
}

/// Log ERROR message tagged with a member id.
#[macro_export]
macro_rules! pl_error {
    ($member:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::error!(concat!("[{}] ", $fmt_str), $member $(, $fmt_arg)*)
    };
}

/// Log an error string to the logger, then return it wrapped in the named
/// `ParlogError` kind.
///
/// Example:
/// ```no_run
/// use parlog::logged_err;
/// fn example(member: u32, index: u64) -> Result<(), parlog::ParlogError> {
///     return logged_err!(member; Inconsistent, "index {} is missing", index);
/// }
/// ```
#[macro_export]
macro_rules! logged_err {
    ($member:expr; $kind:ident, $fmt_str:literal $(, $fmt_arg:expr)*) => {{
        $crate::pl_error!($member; $fmt_str $(, $fmt_arg)*);
        Err($crate::ParlogError::$kind(format!($fmt_str $(, $fmt_arg)*)))
    }};
}
