//! Plugin Isolation and Panic Safety
//!
//! Plugins run in-process with full trust, but a panic inside one plugin's
//! registration callable or lifespan phase must not take the host down with
//! it. Calls into plugin code go through the helpers here, which turn
//! panics into ordinary errors that the loader and the lifespan combinator
//! can record.
//!
//! # Safety Considerations
//!
//! - `catch_unwind` only catches panics, not aborts
//! - The host must not be built with `panic = "abort"`
//! - State a plugin mutated before panicking is discarded by the caller,
//!   which is what makes the `AssertUnwindSafe` wrappers sound in practice

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, UnwindSafe, catch_unwind};

use futures::FutureExt;

/// Call a plugin function, preserving its error type
///
/// Normal errors are returned unchanged. Panics are caught and converted
/// into `E` with `panic_to_error`.
///
/// # Example
///
/// ```ignore
/// let result = call_plugin_preserving_error(
///     AssertUnwindSafe(|| (export.register)(&mut handle)),
///     |message| RegistrationError::Panicked { reference, message },
/// );
/// ```
pub fn call_plugin_preserving_error<F, T, E, PC>(plugin_fn: F, panic_to_error: PC) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + UnwindSafe,
    PC: FnOnce(String) -> E,
{
    match catch_unwind(plugin_fn) {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked");
            Err(panic_to_error(msg))
        }
    }
}

/// Call a plugin function that returns a value directly
///
/// Returns the panic message on failure.
pub fn call_plugin_catching<F, T>(plugin_fn: F) -> Result<T, String>
where
    F: FnOnce() -> T + UnwindSafe,
{
    catch_unwind(plugin_fn).map_err(|panic_info| {
        let msg = extract_panic_message(&panic_info);
        tracing::error!(message = %msg, "Plugin panicked");
        msg
    })
}

/// Drive a plugin future to completion, catching panics raised while polling
///
/// Panics in tasks the future spawns are not caught here.
pub async fn call_plugin_async<Fut>(future: Fut) -> Result<Fut::Output, String>
where
    Fut: Future,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked during async execution");
            Err(msg)
        }
    }
}

/// Extract a human-readable message from panic info
///
/// Handles the common payload types (`&str` and `String`) and falls back
/// to a generic message.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}
