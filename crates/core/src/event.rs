/// A typed domain event that can be turned into an [`EventRecord`](crate::EventRecord).
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **named** by a stable type discriminator used for routing and filtering
///
/// The payload encoding is whatever `serde` produces for the implementing type.
pub trait Event: core::fmt::Debug + Send + Sync {
    /// Stable event type identifier (e.g. "OrderCreated").
    fn event_type(&self) -> &'static str;
}
