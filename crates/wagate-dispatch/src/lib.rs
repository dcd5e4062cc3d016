//! # wagate-dispatch
//!
//! Turns raw protocol events into persisted state and outbound notifications:
//! classification, per-session mailboxes, webhook delivery, and the SSE hub.

pub mod classify;
pub mod dispatcher;
pub mod sse;
pub mod url_policy;
pub mod webhook;

pub use dispatcher::{Dispatcher, Mailbox, SessionContext, SessionSignal, SignalHandler};
pub use sse::{SseHub, SseSubscription};
pub use url_policy::{check_url, validate_webhook_url};
pub use webhook::{sign, DeliverySnapshot, DeliveryStats, WebhookSender, SIGNATURE_HEADER};
