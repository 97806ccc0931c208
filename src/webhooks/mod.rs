//! Inbound webhook handling: authentication, event model, and classification.

pub mod classify;
pub mod events;
pub mod payload;
pub mod signature;

pub use classify::{FormatterId, Lifecycle, RoutingDecision, classify, is_relevant};
pub use events::{Event, EventFamily};
pub use payload::Payload;
pub use signature::{
    SignatureError, WebhookSecret, compute_signature, format_signature_header,
    parse_signature_header, verify_delivery,
};
