//! Job status timeline: storage, deduplication and delivery.
//!
//! - [`JobStore`]: bounded, expiring map of the last payload per run id,
//!   read by status polling.
//! - [`CallbackDispatcher`]: decides whether a new payload is a real
//!   status change and fans it out to the configured sinks.
//! - [`delivery`]: the sinks themselves (HTTP webhook, host progress API,
//!   development log sink).

pub mod delivery;
pub mod dispatcher;
pub mod store;

pub use delivery::host::HostProgressSink;
pub use delivery::log::LogSink;
pub use delivery::webhook::WebhookSink;
pub use delivery::{DeliveryError, StatusSink};
pub use dispatcher::CallbackDispatcher;
pub use store::{JobStore, RecordOutcome};
