//! Unordered flow identity.
//!
//! Equality and hashing are canonicalized so `A->B` and `B->A` packets
//! resolve to the same key, the way the steal-sniffer's session identifier
//! treats a 4-tuple as unordered.

use std::hash::{Hash, Hasher};
use std::net::SocketAddrV4;

/// Which physical direction carried the first observed segment of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

/// Unordered TCP endpoint pair. Only TCP is modeled (see spec §1 scope).
#[derive(Debug, Clone, Copy, Eq)]
pub struct FlowKey {
    pub a: SocketAddrV4,
    pub b: SocketAddrV4,
}

impl FlowKey {
    /// Build a key from a single packet's source/dest; canonical order is
    /// decided at comparison/hash time, not at construction, so the raw
    /// direction stays recoverable via [`FlowKey::direction_of`].
    pub fn new(src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        FlowKey { a: src, b: dst }
    }

    /// Whether `src -> dst` is the same physical direction as this key's
    /// `a -> b`, or the opposite.
    pub fn direction_of(&self, src: SocketAddrV4, dst: SocketAddrV4) -> Direction {
        if src == self.a && dst == self.b {
            Direction::AToB
        } else {
            Direction::BToA
        }
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &FlowKey) -> bool {
        (self.a == other.a && self.b == other.b) || (self.a == other.b && self.b == other.a)
    }
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order-independent: always hash the numerically smaller endpoint first.
        if (self.a.ip(), self.a.port()) <= (self.b.ip(), self.b.port()) {
            self.a.hash(state);
            self.b.hash(state);
        } else {
            self.b.hash(state);
            self.a.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_endpoints_share_a_key() {
        let a: SocketAddrV4 = "10.0.0.1:40001".parse().unwrap();
        let b: SocketAddrV4 = "10.0.0.2:80".parse().unwrap();
        let k1 = FlowKey::new(a, b);
        let k2 = FlowKey::new(b, a);
        assert_eq!(k1, k2);

        use std::collections::hash_map::DefaultHasher;
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        k1.hash(&mut h1);
        k2.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn direction_of_reports_the_raw_packet_direction() {
        let a: SocketAddrV4 = "10.0.0.1:40001".parse().unwrap();
        let b: SocketAddrV4 = "10.0.0.2:80".parse().unwrap();
        let key = FlowKey::new(a, b);
        assert_eq!(key.direction_of(a, b), Direction::AToB);
        assert_eq!(key.direction_of(b, a), Direction::BToA);
    }
}
