//! The single-method subscriber capability.

use eventline_core::EventRecord;

/// Something that reacts to a published event.
///
/// Implemented for plain closures, so most call sites can pass
/// `|event: &EventRecord| { ...; Ok(()) }` directly.
pub trait Subscriber: Send + Sync {
    fn call(&self, event: &EventRecord) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, event: &EventRecord) -> anyhow::Result<()> {
        self(event)
    }
}
