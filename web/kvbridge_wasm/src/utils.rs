//! Utility functions for WASM setup.

/// Sets up the panic hook for better error messages.
///
/// Called when the module initializes; Rust panics are reported in the
/// browser console instead of as an opaque `unreachable`.
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
