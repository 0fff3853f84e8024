//! Domain events for Wolfwatch.
//!
//! The server speaks in loosely-typed envelopes; renderers want a small,
//! closed vocabulary. This crate sits between them:
//!
//! - **Taxonomy** ([`DomainEvent`], [`EventBody`], [`EventKind`]): what
//!   happened, with `kind()` and `is_system()` derived from the body so they
//!   can never disagree.
//! - **Classifier** ([`classify`]): a total, pure envelope → event mapping.
//!   Unknown types fall back to [`EventKind::Unclassified`]; malformed
//!   payloads become [`EventKind::Diagnostic`].
//! - **Narration** ([`Display`], [`Icon`], [`Severity`]): deterministic
//!   English text plus presentation hints.
//! - **Log** ([`EventLog`], [`narratable`]): the bounded display log and
//!   its system-event filter.
//!
//! ```
//! use serde_json::json;
//! use wolfwatch_events::{EventId, EventKind, classify};
//! use wolfwatch_protocol::Envelope;
//!
//! let envelope = Envelope::new("vote_cast", json!({ "voter": "Alice", "target": "Bob" }));
//! let event = classify(&envelope, EventId::sequenced("s1", 1, 7));
//!
//! assert_eq!(event.kind(), EventKind::Vote);
//! assert_eq!(event.display.text, "Alice voted for Bob");
//! ```

mod classify;
mod event;
mod log;

pub use classify::{build, classify, connection_notice, diagnostic};
pub use event::{
    ActionEvent, ActionKind, Display, DomainEvent, EventBody, EventId, EventKind, Heartbeat, Icon,
    Severity,
};
pub use log::{EventLog, narratable};
