//! Routing and forwarding core for a self-organizing LoRa mesh network.
//!
//! [`RoutingCore`] wires together neighbor discovery ([`hello`]), a
//! link-quality routing table ([`routing_table`]), duplicate suppression
//! ([`history`]), a packet codec ([`packet`]) and a choice of forwarding
//! discipline ([`policy`]) into three concurrent
//! [`embassy_executor`] tasks ([`pipeline::rx_task`],
//! [`pipeline::tx_task`], [`pipeline::housekeeper_task`]). It has no
//! opinion on the radio hardware or the application above it — both are
//! supplied as `&'static dyn` trait objects (see [`radio`]) so the core
//! can run unmodified against a simulated transport in tests or a real
//! transceiver driver in the field.
//!
//! ```no_run
//! use lora_mesh_core::config::RoutingConfig;
//! use lora_mesh_core::RoutingCore;
//!
//! # struct MyRadio;
//! # impl lora_mesh_core::radio::RadioSink for MyRadio {
//! #     fn transmit(&self, _frame: &[u8]) -> Result<(), lora_mesh_core::error::RoutingError> { Ok(()) }
//! # }
//! # struct MyApp;
//! # impl lora_mesh_core::radio::ApplicationSink for MyApp {
//! #     fn deliver(&self, _src: u16, _payload: &[u8]) {}
//! # }
//! # async fn example(spawner: embassy_executor::Spawner) {
//! let config = RoutingConfig { local_address: 0x1001, ..Default::default() };
//! let radio: &'static dyn lora_mesh_core::radio::RadioSink = Box::leak(Box::new(MyRadio));
//! let app: &'static dyn lora_mesh_core::radio::ApplicationSink = Box::leak(Box::new(MyApp));
//! let core = RoutingCore::new(config, radio, app).leak();
//! core.spawn_tasks(spawner).expect("failed to spawn routing tasks");
//! core.send(0x1002, b"hello mesh").expect("send failed");
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hello;
pub mod history;
pub mod packet;
pub mod pipeline;
pub mod policy;
pub mod radio;
pub mod routing_table;
pub mod types;

use std::sync::Mutex;

use embassy_executor::{SpawnError, Spawner};

use config::RoutingConfig;
use error::RoutingError;
use hello::HelloEngine;
use history::PacketHistory;
use packet::{PacketCodec, TYPE_NEED_ACK};
use pipeline::{Counters, CountersSnapshot, RxChannel, TxPriority, TxQueue};
use policy::{RoutingPolicy, SendDecision};
use radio::{ApplicationSink, RadioSink};
use routing_table::RoutingTable;
use types::Address;

/// The assembled routing node: one instance per mesh participant.
///
/// Constructed with [`RoutingCore::new`], then promoted to a `'static`
/// reference with [`RoutingCore::leak`] before spawning its tasks — the
/// embassy executor requires task arguments to be `'static`, and a
/// routing node that outlives the function that created it (which is
/// every real node) has no natural owner to borrow from otherwise. This
/// mirrors the simulator's own `Box::leak`-per-node setup.
pub struct RoutingCore {
    pub(crate) config: RoutingConfig,
    pub(crate) codec: PacketCodec,
    pub(crate) table: RoutingTable,
    pub(crate) history: Mutex<PacketHistory>,
    pub(crate) hello_engine: Mutex<HelloEngine>,
    pub(crate) policy: RoutingPolicy,
    pub(crate) radio: &'static dyn RadioSink,
    pub(crate) app: &'static dyn ApplicationSink,
    pub(crate) counters: Counters,
    pub(crate) tx_queue: TxQueue,
    pub(crate) rx_channel: RxChannel,
}

impl RoutingCore {
    pub fn new(config: RoutingConfig, radio: &'static dyn RadioSink, app: &'static dyn ApplicationSink) -> Self {
        let codec = PacketCodec::new(config.max_packet_size);
        let table = RoutingTable::new(config.local_address);
        let policy = RoutingPolicy::from(config.routing_policy);
        let history = Mutex::new(PacketHistory::new(config.max_history_nodes));
        Self {
            config,
            codec,
            table,
            history,
            hello_engine: Mutex::new(HelloEngine::new()),
            policy,
            radio,
            app,
            counters: Counters::default(),
            tx_queue: TxQueue::new(),
            rx_channel: RxChannel::new(),
        }
    }

    /// Promotes this core to a `'static` reference suitable for spawning
    /// its tasks. Leaks the allocation for the lifetime of the process,
    /// which is the expected lifetime of a mesh node.
    pub fn leak(self) -> &'static RoutingCore {
        Box::leak(Box::new(self))
    }

    pub fn spawn_tasks(&'static self, spawner: Spawner) -> Result<(), SpawnError> {
        spawner.spawn(pipeline::rx_task(self))?;
        spawner.spawn(pipeline::tx_task(self))?;
        spawner.spawn(pipeline::housekeeper_task(self))?;
        Ok(())
    }

    pub fn local_address(&self) -> Address {
        self.config.local_address
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Entry point for the radio driver's receive path. See
    /// [`pipeline::RoutingCore::on_radio_receive`] for the non-blocking
    /// contract.
    pub fn receive(&'static self, frame: &[u8], received_link_quality: u8, received_snr: i8) {
        self.on_radio_receive(frame, received_link_quality, received_snr);
    }

    /// Originates a new DATA packet addressed to `dst` (or
    /// [`types::ADDRESS_BROADCAST`]) and queues it for transmission.
    /// Fails immediately, without touching the transmit queue, if vector
    /// routing has no table entry for a unicast `dst`.
    pub fn send(&self, dst: Address, payload: &[u8]) -> Result<(), RoutingError> {
        self.originate(dst, payload, 0)
    }

    /// Same as [`RoutingCore::send`] but also sets the `NEED_ACK` type
    /// bit, for callers that want delivery confirmation semantics on top
    /// of the base forwarding guarantees.
    pub fn send_with_ack(&self, dst: Address, payload: &[u8]) -> Result<(), RoutingError> {
        self.originate(dst, payload, TYPE_NEED_ACK)
    }

    fn originate(&self, dst: Address, payload: &[u8], extra_type_bits: u8) -> Result<(), RoutingError> {
        // A packet we're originating has no `via` yet, so it starts out
        // unknown — not broadcast — even under flooding: flooding only
        // skips the table lookup for a packet already mid-flood with
        // `via == broadcast`, which a fresh local send never is.
        let (via, hops) = match self
            .policy
            .annotate_before_send(&self.table, dst, types::ADDRESS_UNKNOWN, self.config.default_hop_limit)
        {
            SendDecision::Clear { via, hops } => (via, hops),
            SendDecision::Veto { .. } => return Err(RoutingError::Unreachable { destination: dst }),
        };
        let mut packet = self.codec.create_data_packet(dst, self.config.local_address, extra_type_bits, payload, hops);
        if let packet::PacketBody::Data { via: via_field, .. } = &mut packet.body {
            *via_field = via;
        }
        let frame = self.codec.serialize(&packet);

        {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.was_seen(self.config.local_address, packet.id);
        }

        self.tx_queue.push(TxPriority::Data, frame);
        Ok(())
    }
}
