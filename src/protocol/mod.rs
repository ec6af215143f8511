//! Wire protocol for the room channel
//!
//! Every message, inbound or outbound, is an [`Envelope`]: a typed JSON
//! object with a free-form payload and optional metadata. Control envelopes
//! (heartbeat request and acknowledgment) are channel-internal and are never
//! forwarded to application consumers.

pub mod messages;

pub use messages::{Envelope, EnvelopeMeta, HEARTBEAT, HEARTBEAT_ACK};
