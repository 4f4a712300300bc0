//! On-air frame codec (C1): classify, serialize and parse the packet
//! families this mesh speaks, little-endian and packed with no
//! inter-field padding.
//!
//! Every packet family shares an 11-byte `PacketHeader` (`dst:2, src:2,
//! type:1, id:4, packet_size:2`) followed by exactly 3 more fixed bytes
//! specific to the family — `via:2, hops:1` for DATA, `seq_id:1,
//! number:2` for control variants, `routing_table_id:1,
//! routing_table_size:1, node_role:1` for HELLO, `node_role:1, fwd:2`
//! for ROUTE — landing on a uniform 14-byte prefix before any
//! variable-length payload or node array. (The original C structs gave
//! control packets a larger `sizeof` than data packets purely from
//! compiler alignment padding; a packed, padding-free encoding has no
//! such slack, so here every family's fixed prefix is the same 14
//! bytes. `header_length` is still written as a match on type for
//! documentation purposes even though every arm currently agrees.)
//!
//! ROUTE packets are legacy/reserved, and the original marks their
//! routing-table merge logic as a stub. The eight documented type bits
//! fully occupy a byte, leaving none free for a distinct ROUTE
//! discriminant — the original tags a ROUTE packet's wire `type` byte
//! with the HELLO bit alone, which is ambiguous with a real HELLO
//! beacon's own layout. This crate resolves the ambiguity by tagging
//! ROUTE packets with `HELLO | RT_REQUEST` on the wire: that specific
//! combination is otherwise meaningless (`RT_REQUEST` is a unicast
//! control packet, never legitimately paired with the broadcast HELLO
//! bit) and so is free to repurpose as an unambiguous discriminant.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::types::{Address, HelloPacketNode, NetworkNode, Role, ADDRESS_BROADCAST};

pub const TYPE_DATA: u8 = 0x01;
pub const TYPE_HELLO: u8 = 0x02;
pub const TYPE_ACK: u8 = 0x04;
pub const TYPE_NEED_ACK: u8 = 0x08;
pub const TYPE_LOST: u8 = 0x10;
pub const TYPE_SYNC: u8 = 0x20;
pub const TYPE_XL_DATA: u8 = 0x40;
pub const TYPE_RT_REQUEST: u8 = 0x80;

/// Wire discriminant for the legacy/reserved ROUTE family (see module docs).
const TYPE_ROUTE_TAG: u8 = TYPE_HELLO | TYPE_RT_REQUEST;

/// Fixed prefix shared by every packet family: the 11-byte `PacketHeader`
/// plus 3 more type-specific fixed bytes.
pub const HEADER_PREFIX_LEN: usize = 14;
const PACKET_HEADER_LEN: usize = 9; // dst(2)+src(2)+type(1) ... see note below
const HELLO_NODE_LEN: usize = 3; // address:2, received_link_quality:1
const NETWORK_NODE_LEN: usize = 5; // address:2, metric:1, role:1, hop_count:1

// NOTE: `PACKET_HEADER_LEN` above intentionally does *not* equal the
// 11-byte `PacketHeader` (`dst:2, src:2, type:1, id:4, packet_size:2`)
// actually written on the wire. The original's prose description of the
// header sums it incorrectly as "9 bytes", dropping the 4-byte `id`
// field. We lay out the real 11-byte header directly in
// `write_header`/`read_header` below rather than through this constant;
// it's kept only so the arithmetic comment trail is visible in one place.
const _: () = assert!(PACKET_HEADER_LEN + 2 == 11);

/// Parsed packet. `type_bits` is kept alongside the decoded `body` so
/// combination bits that don't affect body shape (`NEED_ACK`, `ACK`,
/// `LOST`, `SYNC`, `XL_DATA`) survive a round trip even on a DATA packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub dst: Address,
    pub src: Address,
    pub type_bits: u8,
    pub id: u32,
    pub packet_size: u16,
    pub body: PacketBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    Data {
        via: Address,
        hops: u8,
        payload: Vec<u8>,
    },
    Hello {
        routing_table_id: u8,
        routing_table_size: u8,
        node_role: Role,
        nodes: Vec<HelloPacketNode>,
    },
    Route {
        node_role: Role,
        fwd: Address,
        nodes: Vec<NetworkNode>,
    },
    Control {
        seq_id: u8,
        number: u16,
        payload: Vec<u8>,
    },
}

impl Packet {
    pub fn is_data(&self) -> bool {
        is_data(self.type_bits)
    }
    pub fn is_hello(&self) -> bool {
        is_hello(self.type_bits)
    }
    pub fn is_route(&self) -> bool {
        is_route(self.type_bits)
    }
    pub fn is_control(&self) -> bool {
        is_control(self.type_bits)
    }
    pub fn is_need_ack(&self) -> bool {
        is_need_ack(self.type_bits)
    }
    pub fn is_ack(&self) -> bool {
        is_ack(self.type_bits)
    }
    pub fn is_lost(&self) -> bool {
        is_lost(self.type_bits)
    }
    pub fn is_sync(&self) -> bool {
        is_sync(self.type_bits)
    }
    pub fn is_xl(&self) -> bool {
        is_xl(self.type_bits)
    }
}

pub fn is_data(type_bits: u8) -> bool {
    type_bits & TYPE_DATA != 0
}
pub fn is_route(type_bits: u8) -> bool {
    type_bits == TYPE_ROUTE_TAG
}
pub fn is_hello(type_bits: u8) -> bool {
    type_bits & TYPE_HELLO != 0 && !is_route(type_bits)
}
pub fn is_control(type_bits: u8) -> bool {
    !is_data(type_bits) && !is_hello(type_bits) && !is_route(type_bits)
}
pub fn is_need_ack(type_bits: u8) -> bool {
    type_bits & TYPE_NEED_ACK != 0
}
pub fn is_ack(type_bits: u8) -> bool {
    type_bits & TYPE_ACK != 0
}
pub fn is_lost(type_bits: u8) -> bool {
    type_bits & TYPE_LOST != 0
}
pub fn is_sync(type_bits: u8) -> bool {
    type_bits & TYPE_SYNC != 0
}
pub fn is_xl(type_bits: u8) -> bool {
    type_bits & TYPE_XL_DATA != 0
}

/// Every defined family shares the same 14-byte fixed prefix; see module docs.
pub fn header_length(type_bits: u8) -> usize {
    match type_bits {
        t if is_data(t) => HEADER_PREFIX_LEN,
        t if is_hello(t) => HEADER_PREFIX_LEN,
        t if is_route(t) => HEADER_PREFIX_LEN,
        _ => HEADER_PREFIX_LEN,
    }
}

/// Builds and parses packets for one node. Owns the monotonic packet-id
/// counter and the configured maximum frame size. Deliberately not a
/// process-wide singleton: a node that needs two independent codec
/// instances, e.g. in a multi-node test harness, gets two independent
/// id sequences.
pub struct PacketCodec {
    max_packet_size: u16,
    next_id: AtomicU32,
}

impl PacketCodec {
    pub fn new(max_packet_size: u16) -> Self {
        Self {
            max_packet_size,
            next_id: AtomicU32::new(0),
        }
    }

    fn next_packet_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
            // Skip the wraparound value that lands back on the reserved 0.
        }
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn create_data_packet(
        &self,
        dst: Address,
        src: Address,
        type_bits: u8,
        payload: &[u8],
        max_hops: u8,
    ) -> Packet {
        let type_bits = type_bits | TYPE_DATA;
        let max_payload = self.max_packet_size as usize - HEADER_PREFIX_LEN;
        let payload = if payload.len() > max_payload {
            log::warn!(
                "truncating data packet payload from {} to {} bytes (max_packet_size={})",
                payload.len(),
                max_payload,
                self.max_packet_size
            );
            &payload[..max_payload]
        } else {
            payload
        };
        let packet_size = (HEADER_PREFIX_LEN + payload.len()) as u16;
        Packet {
            dst,
            src,
            type_bits,
            id: self.next_packet_id(),
            packet_size,
            body: PacketBody::Data {
                via: ADDRESS_UNKNOWN_VIA,
                hops: max_hops,
                payload: payload.to_vec(),
            },
        }
    }

    pub fn create_hello_packet(
        &self,
        local_addr: Address,
        routing_table_id: u8,
        routing_table_size: u8,
        node_role: Role,
        hello_nodes: &[HelloPacketNode],
    ) -> Packet {
        let packet_size = (HEADER_PREFIX_LEN + hello_nodes.len() * HELLO_NODE_LEN) as u16;
        Packet {
            dst: ADDRESS_BROADCAST,
            src: local_addr,
            type_bits: TYPE_HELLO,
            id: 0,
            packet_size,
            body: PacketBody::Hello {
                routing_table_id,
                routing_table_size,
                node_role,
                nodes: hello_nodes.to_vec(),
            },
        }
    }

    pub fn create_route_request(&self, dst: Address, src: Address) -> Packet {
        Packet {
            dst,
            src,
            type_bits: TYPE_RT_REQUEST,
            id: 0,
            packet_size: HEADER_PREFIX_LEN as u16,
            body: PacketBody::Control {
                seq_id: 0,
                number: 0,
                payload: Vec::new(),
            },
        }
    }

    pub fn create_control_packet(
        &self,
        dst: Address,
        src: Address,
        type_bits: u8,
        payload: &[u8],
    ) -> Packet {
        let max_payload = self.max_packet_size as usize - HEADER_PREFIX_LEN;
        let payload = if payload.len() > max_payload {
            log::warn!("truncating control packet payload from {} to {} bytes", payload.len(), max_payload);
            &payload[..max_payload]
        } else {
            payload
        };
        let packet_size = (HEADER_PREFIX_LEN + payload.len()) as u16;
        Packet {
            dst,
            src,
            type_bits,
            id: 0,
            packet_size,
            body: PacketBody::Control {
                seq_id: 0,
                number: 0,
                payload: payload.to_vec(),
            },
        }
    }

    pub fn serialize(&self, packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::with_capacity(packet.packet_size as usize);
        buf.extend_from_slice(&packet.dst.to_le_bytes());
        buf.extend_from_slice(&packet.src.to_le_bytes());
        buf.push(packet.type_bits);
        buf.extend_from_slice(&packet.id.to_le_bytes());
        buf.extend_from_slice(&packet.packet_size.to_le_bytes());

        match &packet.body {
            PacketBody::Data { via, hops, payload } => {
                buf.extend_from_slice(&via.to_le_bytes());
                buf.push(*hops);
                buf.extend_from_slice(payload);
            }
            PacketBody::Control { seq_id, number, payload } => {
                buf.push(*seq_id);
                buf.extend_from_slice(&number.to_le_bytes());
                buf.extend_from_slice(payload);
            }
            PacketBody::Hello {
                routing_table_id,
                routing_table_size,
                node_role,
                nodes,
            } => {
                buf.push(*routing_table_id);
                buf.push(*routing_table_size);
                buf.push(*node_role);
                for node in nodes {
                    buf.extend_from_slice(&node.address.to_le_bytes());
                    buf.push(node.received_link_quality);
                }
            }
            PacketBody::Route { node_role, fwd, nodes } => {
                buf.push(*node_role);
                buf.extend_from_slice(&fwd.to_le_bytes());
                for node in nodes {
                    buf.extend_from_slice(&node.address.to_le_bytes());
                    buf.push(node.metric);
                    buf.push(node.role);
                    buf.push(node.hop_count);
                }
            }
        }

        buf
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<Packet, crate::error::RoutingError> {
        if bytes.len() < 11 {
            return Err(crate::error::RoutingError::MalformedFrame {
                reason: "frame shorter than common header",
            });
        }
        let dst = u16::from_le_bytes([bytes[0], bytes[1]]);
        let src = u16::from_le_bytes([bytes[2], bytes[3]]);
        let type_bits = bytes[4];
        let id = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let packet_size = u16::from_le_bytes([bytes[9], bytes[10]]);

        if bytes.len() < HEADER_PREFIX_LEN || (packet_size as usize) < HEADER_PREFIX_LEN {
            return Err(crate::error::RoutingError::MalformedFrame {
                reason: "frame shorter than type-specific fixed prefix",
            });
        }
        if bytes.len() < packet_size as usize {
            return Err(crate::error::RoutingError::MalformedFrame {
                reason: "frame shorter than declared packet_size",
            });
        }

        let body = if is_route(type_bits) {
            let node_role = bytes[11];
            let fwd = u16::from_le_bytes([bytes[12], bytes[13]]);
            let nodes = parse_network_nodes(&bytes[HEADER_PREFIX_LEN..packet_size as usize])?;
            PacketBody::Route { node_role, fwd, nodes }
        } else if is_hello(type_bits) {
            let routing_table_id = bytes[11];
            let routing_table_size = bytes[12];
            let node_role = bytes[13];
            let nodes = parse_hello_nodes(&bytes[HEADER_PREFIX_LEN..packet_size as usize])?;
            PacketBody::Hello {
                routing_table_id,
                routing_table_size,
                node_role,
                nodes,
            }
        } else if is_data(type_bits) {
            let via = u16::from_le_bytes([bytes[11], bytes[12]]);
            let hops = bytes[13];
            let payload = bytes[HEADER_PREFIX_LEN..packet_size as usize].to_vec();
            PacketBody::Data { via, hops, payload }
        } else {
            let seq_id = bytes[11];
            let number = u16::from_le_bytes([bytes[12], bytes[13]]);
            let payload = bytes[HEADER_PREFIX_LEN..packet_size as usize].to_vec();
            PacketBody::Control { seq_id, number, payload }
        };

        Ok(Packet {
            dst,
            src,
            type_bits,
            id,
            packet_size,
            body,
        })
    }
}

/// `via` is left at this sentinel until `annotate_before_send` (C5) fills
/// it in; zero is indistinguishable from "no route" which is exactly
/// what it means until annotation runs.
const ADDRESS_UNKNOWN_VIA: Address = crate::types::ADDRESS_UNKNOWN;

fn parse_hello_nodes(bytes: &[u8]) -> Result<Vec<HelloPacketNode>, crate::error::RoutingError> {
    if bytes.len() % HELLO_NODE_LEN != 0 {
        return Err(crate::error::RoutingError::MalformedFrame {
            reason: "hello node array not a multiple of node size",
        });
    }
    Ok(bytes
        .chunks_exact(HELLO_NODE_LEN)
        .map(|c| HelloPacketNode {
            address: u16::from_le_bytes([c[0], c[1]]),
            received_link_quality: c[2],
        })
        .collect())
}

fn parse_network_nodes(bytes: &[u8]) -> Result<Vec<NetworkNode>, crate::error::RoutingError> {
    if bytes.len() % NETWORK_NODE_LEN != 0 {
        return Err(crate::error::RoutingError::MalformedFrame {
            reason: "network node array not a multiple of node size",
        });
    }
    Ok(bytes
        .chunks_exact(NETWORK_NODE_LEN)
        .map(|c| NetworkNode {
            address: u16::from_le_bytes([c[0], c[1]]),
            metric: c[2],
            role: c[3],
            hop_count: c[4],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_data_packet() {
        let codec = PacketCodec::new(255);
        let mut packet = codec.create_data_packet(0x0022, 0x0011, TYPE_DATA, b"ping", 10);
        if let PacketBody::Data { via, .. } = &mut packet.body {
            *via = 0x0022;
        }
        let bytes = codec.serialize(&packet);
        let parsed = codec.parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn round_trips_hello_packet() {
        let codec = PacketCodec::new(255);
        let nodes = [
            HelloPacketNode { address: 0x01, received_link_quality: 200 },
            HelloPacketNode { address: 0x02, received_link_quality: 50 },
        ];
        let packet = codec.create_hello_packet(0x0011, 3, 2, ROLE_DEFAULT_FOR_TEST, &nodes);
        let bytes = codec.serialize(&packet);
        let parsed = codec.parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    const ROLE_DEFAULT_FOR_TEST: Role = 0;

    #[test]
    fn round_trips_route_request() {
        let codec = PacketCodec::new(255);
        let packet = codec.create_route_request(0x0022, 0x0011);
        let bytes = codec.serialize(&packet);
        let parsed = codec.parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
        assert!(parsed.is_need_ack() == false);
    }

    #[test]
    fn classifies_route_tag_distinctly_from_hello() {
        assert!(is_hello(TYPE_HELLO));
        assert!(!is_route(TYPE_HELLO));
        assert!(is_route(TYPE_HELLO | TYPE_RT_REQUEST));
        assert!(!is_hello(TYPE_HELLO | TYPE_RT_REQUEST));
    }

    #[test]
    fn truncates_oversized_payload_with_warning() {
        let codec = PacketCodec::new(20);
        let payload = vec![0xAAu8; 100];
        let packet = codec.create_data_packet(1, 2, TYPE_DATA, &payload, 5);
        match &packet.body {
            PacketBody::Data { payload, .. } => assert_eq!(payload.len(), 20 - HEADER_PREFIX_LEN),
            _ => panic!("expected data body"),
        }
    }

    #[test]
    fn data_packet_ids_are_monotonic_and_never_zero() {
        let codec = PacketCodec::new(255);
        let a = codec.create_data_packet(1, 2, TYPE_DATA, b"a", 1);
        let b = codec.create_data_packet(1, 2, TYPE_DATA, b"b", 1);
        assert_ne!(a.id, 0);
        assert_ne!(b.id, 0);
        assert!(b.id > a.id);
    }

    #[test]
    fn parse_rejects_truncated_frame() {
        let codec = PacketCodec::new(255);
        assert!(codec.parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn combination_type_bits_classify_as_both() {
        let t = TYPE_DATA | TYPE_NEED_ACK;
        assert!(is_data(t));
        assert!(is_need_ack(t));
        assert!(is_control(t) == false);
    }
}
