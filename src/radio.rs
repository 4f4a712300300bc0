//! Boundary traits between the routing core and the two things outside
//! it: the radio driver underneath and the application above.
//!
//! Both are plain synchronous, object-safe traits rather than
//! async-fn-in-trait. `RoutingCore` holds them as `&'static dyn`
//! references (see `lib.rs`) so the `#[embassy_executor::task]` functions
//! that drive the pipeline stay non-generic — embassy's task macro
//! doesn't support generic task functions, and a `dyn`-incompatible
//! async trait would force one. A driver that needs to block on actual
//! I/O is expected to do that blocking itself (a real LoRa transceiver
//! is driven over a synchronous SPI bus in practice); a driver that
//! wants to hand off to its own async world can stash the frame in a
//! channel from inside `transmit` and return immediately.

use crate::types::Address;

/// The underlying radio transceiver, from the routing core's point of view.
pub trait RadioSink: Send + Sync {
    /// Queues `frame` for on-air transmission. Errors are logged and
    /// counted by the pipeline; they never propagate back into route
    /// computation.
    fn transmit(&self, frame: &[u8]) -> Result<(), crate::error::RoutingError>;
}

/// The application layer sitting above the routing core.
pub trait ApplicationSink: Send + Sync {
    /// Delivers a payload that was addressed to this node (or broadcast),
    /// after forwarding/dedup decisions have already been made.
    fn deliver(&self, src: Address, payload: &[u8]);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingRadio {
        pub sent: Mutex<Vec<Vec<u8>>>,
    }

    impl RadioSink for RecordingRadio {
        fn transmit(&self, frame: &[u8]) -> Result<(), crate::error::RoutingError> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingApplication {
        pub received: Mutex<Vec<(Address, Vec<u8>)>>,
    }

    impl ApplicationSink for RecordingApplication {
        fn deliver(&self, src: Address, payload: &[u8]) {
            self.received.lock().unwrap().push((src, payload.to_vec()));
        }
    }
}
