//! `eventline-events`: in-process publish/subscribe.
//!
//! - [`Subscriber`]: the single-method capability every subscriber implements
//! - [`Handler`]: a registered subscriber (shared instance or per-dispatch factory)
//! - [`Broker`]: process-wide subscriptions and dispatch
//! - [`SubscriptionContext`]: subscriptions scoped to one logical unit of work
//! - [`Dispatcher`]: failure-isolated invocation

pub mod broker;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod revocation;
pub mod subscriber;

pub use broker::Broker;
pub use context::{SubscriptionContext, Within};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use handler::{Handler, HandlerError};
pub use registry::{Subscription, SubscriptionId};
pub use revocation::Revocation;
pub use subscriber::Subscriber;
