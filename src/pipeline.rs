//! Forwarding pipeline (C6): the three concurrent tasks that drive a
//! running node — receive, transmit, and housekeeping — plus the
//! priority-ordered transmit queue and the observability counters they
//! share.
//!
//! The task split and the `&'static` core reference each one closes over
//! mirror the simulator's per-node task: one task owns the inbound side,
//! one owns the outbound side, and a third drives time-based work, all
//! reading and mutating shared state through `RoutingCore` rather than
//! passing messages between themselves directly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use crate::packet::{PacketBody, TYPE_RT_REQUEST};
use crate::policy::{ReceiveDecision, SendDecision};
use crate::types::{Address, ADDRESS_BROADCAST};
use crate::RoutingCore;

/// Depth of the bounded channel between the radio driver's receive
/// callback and `rx_task`. A driver calling `on_radio_receive` faster
/// than the pipeline can drain drops the newest frame and logs a
/// warning, the same bounded-ring-buffer trade-off the simulator's
/// inter-task channels make rather than blocking the caller.
pub const RX_CHANNEL_DEPTH: usize = 16;

pub struct RxEvent {
    pub frame: Vec<u8>,
    pub received_link_quality: u8,
    pub received_snr: i8,
}

pub type RxChannel = Channel<CriticalSectionRawMutex, RxEvent, RX_CHANNEL_DEPTH>;

/// Lock-free counters for the pipeline's steady-state decisions. Exposed
/// read-only through [`Counters::snapshot`] for diagnostics; nothing in
/// the pipeline branches on their value.
#[derive(Default)]
pub struct Counters {
    pub rx_total: AtomicU32,
    pub tx_total: AtomicU32,
    pub duplicates_dropped: AtomicU32,
    pub unreachable_dropped: AtomicU32,
    pub ttl_expired_dropped: AtomicU32,
    pub malformed_dropped: AtomicU32,
    pub rx_queue_overflow: AtomicU32,
    pub route_requests_sent: AtomicU32,
    pub route_requests_served: AtomicU32,
    pub hellos_sent: AtomicU32,
    pub hellos_processed: AtomicU32,
    pub transmit_failures: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub rx_total: u32,
    pub tx_total: u32,
    pub duplicates_dropped: u32,
    pub unreachable_dropped: u32,
    pub ttl_expired_dropped: u32,
    pub malformed_dropped: u32,
    pub rx_queue_overflow: u32,
    pub route_requests_sent: u32,
    pub route_requests_served: u32,
    pub hellos_sent: u32,
    pub hellos_processed: u32,
    pub transmit_failures: u32,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            rx_total: self.rx_total.load(Ordering::Relaxed),
            tx_total: self.tx_total.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            unreachable_dropped: self.unreachable_dropped.load(Ordering::Relaxed),
            ttl_expired_dropped: self.ttl_expired_dropped.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            rx_queue_overflow: self.rx_queue_overflow.load(Ordering::Relaxed),
            route_requests_sent: self.route_requests_sent.load(Ordering::Relaxed),
            route_requests_served: self.route_requests_served.load(Ordering::Relaxed),
            hellos_sent: self.hellos_sent.load(Ordering::Relaxed),
            hellos_processed: self.hellos_processed.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxPriority {
    Data = 0,
    Hello = 1,
    Control = 2,
}

#[derive(Default)]
struct TxQueueInner {
    control: VecDeque<Vec<u8>>,
    hello: VecDeque<Vec<u8>>,
    data: VecDeque<Vec<u8>>,
}

/// Strict cross-class priority queue: every queued `Control` frame drains
/// before any `Hello`, and every `Hello` before any `Data`, with FIFO
/// order preserved within a class. `embassy_futures::select` alone can't
/// express that — racing three receive futures picks whichever happens
/// to be ready first, not whichever class ranks highest — so the three
/// classes share one lock and one doorbell instead of three channels.
pub struct TxQueue {
    inner: BlockingMutex<CriticalSectionRawMutex, RefCell<TxQueueInner>>,
    doorbell: Signal<CriticalSectionRawMutex, ()>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(TxQueueInner::default())),
            doorbell: Signal::new(),
        }
    }

    pub fn push(&self, priority: TxPriority, frame: Vec<u8>) {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            match priority {
                TxPriority::Control => inner.control.push_back(frame),
                TxPriority::Hello => inner.hello.push_back(frame),
                TxPriority::Data => inner.data.push_back(frame),
            }
        });
        self.doorbell.signal(());
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner
                .control
                .pop_front()
                .or_else(|| inner.hello.pop_front())
                .or_else(|| inner.data.pop_front())
        })
    }

    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(frame) = self.try_pop() {
                return frame;
            }
            self.doorbell.wait().await;
        }
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingCore {
    /// Called by the radio driver for every frame it receives, from
    /// whatever context the driver runs its receive interrupt or polling
    /// loop in. Never blocks: a full channel drops the frame and counts
    /// it rather than backing up the caller.
    pub fn on_radio_receive(&'static self, frame: &[u8], received_link_quality: u8, received_snr: i8) {
        let event = RxEvent { frame: frame.to_vec(), received_link_quality, received_snr };
        if self.rx_channel.try_send(event).is_err() {
            self.counters.rx_queue_overflow.fetch_add(1, Ordering::Relaxed);
            log::warn!("rx channel full, dropping inbound frame");
        }
    }

    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    fn handle_rx_event(&self, event: RxEvent) {
        self.counters.rx_total.fetch_add(1, Ordering::Relaxed);

        let packet = match self.codec.parse(&event.frame) {
            Ok(packet) => packet,
            Err(err) => {
                self.counters.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping malformed frame: {err}");
                return;
            }
        };

        let now = self.now_ms();
        let timeout_ms = self.config.default_timeout_ms();

        if packet.is_hello() {
            let mut hello_engine = self.hello_engine.lock().expect("hello engine lock poisoned");
            if let Some(outcome) = hello_engine.process_hello_packet(
                &self.table,
                self.config.local_address,
                packet.src,
                &packet.body,
                event.received_link_quality,
                event.received_snr,
                now,
                timeout_ms,
            ) {
                self.counters.hellos_processed.fetch_add(1, Ordering::Relaxed);
                if outcome.needs_route_request {
                    drop(hello_engine);
                    self.send_route_request(packet.src);
                }
            }
            return;
        }

        if packet.is_route() {
            if let PacketBody::Route { nodes, .. } = &packet.body {
                self.table.merge_route_nodes(packet.src, nodes, now, timeout_ms);
            }
            return;
        }

        if packet.is_data() {
            self.handle_data_packet(packet, now, timeout_ms);
            return;
        }

        self.handle_control_packet(packet, now, timeout_ms);
    }

    /// A unicast `dst == local_address` packet is delivered locally and
    /// never relayed. A broadcast `dst` is delivered locally *and* still
    /// run through `route_received`/`forward_data`, since under flooding
    /// a broadcast datagram needs every recipient to both consume it and
    /// rebroadcast it for neighbors further out.
    fn handle_data_packet(&self, packet: crate::packet::Packet, now: u64, timeout_ms: u64) {
        let is_duplicate = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.was_seen(packet.src, packet.id)
        };
        if is_duplicate {
            self.counters.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let (via, hops, payload) = match &packet.body {
            PacketBody::Data { via, hops, payload } => (*via, *hops, payload.clone()),
            _ => return,
        };

        let local = self.config.local_address;
        let is_for_us = packet.dst == local || packet.dst == ADDRESS_BROADCAST;
        if is_for_us {
            self.app.deliver(packet.src, &payload);
            if packet.dst != ADDRESS_BROADCAST {
                return;
            }
        }

        match self.policy.route_received(local, via, hops) {
            ReceiveDecision::AcceptForRelay => self.forward_data(packet, via, hops),
            ReceiveDecision::Drop { reason } => {
                self.counters.unreachable_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping data packet {:#06x}->{:#06x}: {reason}", packet.src, packet.dst);
            }
        }
        let _ = (now, timeout_ms);
    }

    fn forward_data(&self, mut packet: crate::packet::Packet, via: Address, hops: u8) {
        let decision = self.policy.annotate_before_send(&self.table, packet.dst, via, hops);
        let (next_via, next_hops) = match decision {
            SendDecision::Clear { via, hops } => (via, hops),
            SendDecision::Veto { reason } => {
                self.counters.unreachable_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping data packet {:#06x}->{:#06x}: {reason}", packet.src, packet.dst);
                return;
            }
        };
        if let PacketBody::Data { via, hops: body_hops, .. } = &mut packet.body {
            *via = next_via;
            *body_hops = next_hops;
        }
        let frame = self.codec.serialize(&packet);
        self.tx_queue.push(TxPriority::Data, frame);
    }

    fn handle_control_packet(&self, packet: crate::packet::Packet, now: u64, timeout_ms: u64) {
        if packet.type_bits & TYPE_RT_REQUEST != 0 {
            let nodes = self.table.all_network_nodes();
            let response = crate::packet::Packet {
                dst: packet.src,
                src: self.config.local_address,
                type_bits: crate::packet::TYPE_HELLO | TYPE_RT_REQUEST,
                id: 0,
                packet_size: 0,
                body: PacketBody::Route { node_role: crate::types::ROLE_DEFAULT, fwd: self.config.local_address, nodes },
            };
            let mut response = response;
            response.packet_size = self.codec.serialize(&response).len() as u16;
            let frame = self.codec.serialize(&response);
            self.counters.route_requests_served.fetch_add(1, Ordering::Relaxed);
            self.tx_queue.push(TxPriority::Control, frame);
        } else {
            log::debug!("received control packet type={:#04x} from {:#06x}", packet.type_bits, packet.src);
        }
        let _ = (now, timeout_ms);
    }

    fn send_route_request(&self, dst: Address) {
        let request = self.codec.create_route_request(dst, self.config.local_address);
        let frame = self.codec.serialize(&request);
        self.counters.route_requests_sent.fetch_add(1, Ordering::Relaxed);
        self.tx_queue.push(TxPriority::Control, frame);
    }

    fn maybe_send_hello(&self) {
        let due = {
            let engine = self.hello_engine.lock().expect("hello engine lock poisoned");
            engine.due(self.now_ms(), self.config.hello_interval_ms)
        };
        if !due {
            return;
        }

        let nodes = self.table.hello_nodes();
        let mut packet = self.codec.create_hello_packet(
            self.config.local_address,
            self.table.routing_table_id(),
            self.table.len() as u8,
            crate::types::ROLE_DEFAULT,
            &nodes,
        );
        packet.packet_size = self.codec.serialize(&packet).len() as u16;
        let frame = self.codec.serialize(&packet);
        self.tx_queue.push(TxPriority::Hello, frame);
        self.counters.hellos_sent.fetch_add(1, Ordering::Relaxed);

        let mut engine = self.hello_engine.lock().expect("hello engine lock poisoned");
        engine.record_sent(self.now_ms());
    }

    fn run_housekeeping_tick(&self) {
        self.maybe_send_hello();
        let evicted = self.table.sweep_timeouts(self.now_ms());
        if !evicted.is_empty() {
            log::debug!("evicted {} stale routing table entries", evicted.len());
        }
    }
}

/// Drains inbound frames handed over by the radio driver and runs them
/// through classification, dedup and forwarding.
#[embassy_executor::task]
pub async fn rx_task(core: &'static RoutingCore) {
    loop {
        let event = core.rx_channel.receive().await;
        core.handle_rx_event(event);
    }
}

/// Drains the priority transmit queue and hands frames to the radio driver.
#[embassy_executor::task]
pub async fn tx_task(core: &'static RoutingCore) {
    loop {
        let frame = core.tx_queue.pop().await;
        core.counters.tx_total.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = core.radio.transmit(&frame) {
            core.counters.transmit_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("radio transmit failed: {err}");
        }
    }
}

/// Periodic time-based work: hello beacons and routing table eviction.
/// A fixed tick rather than two independently-scheduled timers, since
/// both operations are cheap and the eviction sweep only needs to run
/// often enough to catch deadlines within one hello interval's slack.
#[embassy_executor::task]
pub async fn housekeeper_task(core: &'static RoutingCore) {
    let tick = Duration::from_millis((core.config.hello_interval_ms / 4).max(1_000) as u64);
    loop {
        core.run_housekeeping_tick();
        Timer::after(tick).await;
    }
}
