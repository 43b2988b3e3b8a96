//! Blocking bridge between the synchronous storage traits and async sqlx calls.

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Capture the runtime the adapter will block on.
///
/// Returns `None` outside of a Tokio runtime.
pub(crate) fn current_handle() -> Option<Handle> {
    Handle::try_current().ok()
}

/// Run `future` to completion on `handle` from synchronous code.
///
/// Called from a plain thread this is a straight `block_on`. Called from a worker of a
/// multi-threaded runtime the worker is first handed over with `block_in_place`, since
/// blocking a runtime thread directly panics. A current-thread runtime cannot be
/// blocked from within; adapters must be driven from a separate thread there.
pub(crate) fn block_on<F: Future>(handle: &Handle, future: F) -> F::Output {
    match Handle::try_current() {
        Ok(inner) if inner.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        _ => handle.block_on(future),
    }
}
