//! # Core Types Module
//!
//! Packet descriptors handed to the shaping engine by the packet pipeline.
//!
//! The engine only looks at a packet's size and classification attributes.
//! The payload is an immutable, reference-counted buffer, so moving a packet
//! into a class queue never shares mutable state with the producer.

use bytes::Bytes;
use std::fmt;

/// Packet descriptor processed by the shaper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Identifier assigned by the producer (for tracing and test assertions)
    pub id: u64,

    /// Size on the wire in bytes; this is what the token bucket charges
    pub size: u32,

    /// Priority hint used by the default classifier
    pub priority: u32,

    /// DiffServ code point (0..=63)
    pub dscp: u8,

    /// Optional flow identifier
    pub flow_id: Option<u32>,

    /// Opaque payload reference
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet with the given id and size and no payload
    pub fn new(id: u64, size: u32) -> Self {
        Self {
            id,
            size,
            priority: 0,
            dscp: 0,
            flow_id: None,
            payload: Bytes::new(),
        }
    }

    /// Create a packet whose size is taken from its payload
    pub fn from_payload(id: u64, payload: Bytes) -> Self {
        let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        Self {
            payload,
            ..Self::new(id, size)
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the DSCP value; only the low six bits are kept
    pub fn with_dscp(mut self, dscp: u8) -> Self {
        self.dscp = dscp & 0x3f;
        self
    }

    pub fn with_flow(mut self, flow_id: u32) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    /// Size in bytes as the 64-bit quantity used by token and deficit accounting
    pub fn len_bytes(&self) -> u64 {
        u64::from(self.size)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet#{} ({} bytes, prio {}, dscp {})",
            self.id, self.size, self.priority, self.dscp
        )
    }
}
