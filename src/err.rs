//! Contract-violation handling.
//!
//! There are no recoverable "errors" in the usual Rust sense inside the
//! scheduler's hot paths -- wait/post/tick always complete. What this module
//! handles is the four-way split between configuration contracts, runtime
//! invariants, recoverable conditions, and diagnostics. Configuration and
//! runtime-invariant violations are fatal assertions in debug builds and
//! silently ignored in release builds, trading detectability for the flash
//! and cycle budget of the smallest supported parts.

/// Fires a fatal assertion in debug builds; compiled out entirely in release
/// builds, so it costs nothing on the target where flash and cycles are
/// scarce.
#[macro_export]
macro_rules! kassert {
    ($cond:expr) => {
        debug_assert!($cond, "kernel contract violated");
    };
    ($cond:expr, $($arg:tt)+) => {
        debug_assert!($cond, $($arg)+);
    };
}

/// Fires a fatal assertion in debug builds if `a != b`; compiled out in
/// release builds.
#[macro_export]
macro_rules! kassert_eq {
    ($a:expr, $b:expr) => {
        debug_assert_eq!($a, $b, "kernel contract violated");
    };
    ($a:expr, $b:expr, $($arg:tt)+) => {
        debug_assert_eq!($a, $b, $($arg)+);
    };
}
