//! Error types surfaced across the crate's public API.
//!
//! Most failure modes in the steady-state pipeline are *not* errors: a
//! duplicate data packet, an unreachable destination, a hop-limit
//! expiry, or a stale hello are handled by incrementing a counter and
//! dropping the packet, logged at `debug` or `warn`. `RoutingError` only
//! covers conditions surfaced to the caller or fatal at bring-up.

use crate::types::Address;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// `send()` found no routing-table entry for a unicast destination at
    /// annotation time.
    #[error("no route to {destination:#06x}")]
    Unreachable { destination: Address },

    /// Requested payload doesn't fit below `max_packet_size` once the
    /// type's header is subtracted.
    #[error("payload of {requested} bytes exceeds the {max}-byte limit for this packet type")]
    InvalidPayload { requested: usize, max: usize },

    /// A frame failed to parse as any known packet family.
    #[error("malformed frame ({reason})")]
    MalformedFrame { reason: &'static str },

    /// A bounded queue was full and the enqueue was rejected.
    #[error("queue full")]
    QueueFull,

    /// The radio driver could not be brought up. Fatal: this aborts
    /// node bring-up rather than being retried in the steady-state loop.
    #[error("radio driver initialization failed: {reason}")]
    RadioInit { reason: &'static str },
}
