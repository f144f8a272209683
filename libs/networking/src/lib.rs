//! Networking utilities for sshtuntap.
//!
//! This library provides helpers for:
//! - IPv4 network blocks (CIDR parsing, offset arithmetic)
//! - Point-to-point address pair allocation inside a block
//!
//! Every user link is a pair of addresses: the server side always sits at
//! [`SERVER_OFFSET`] and each client gets the lowest free offset above it.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Address pool exhausted.
    #[error("address pool exhausted: {0}")]
    PoolExhausted(String),

    /// Address does not belong to the block.
    #[error("{address} is not in block {block}")]
    OutOfBlock { address: Ipv4Addr, block: String },

    /// Address is one of the block's reserved addresses.
    #[error("{address} is reserved in block {block}")]
    Reserved { address: Ipv4Addr, block: String },
}

// ============================================================================
// Network blocks
// ============================================================================

/// Offset of the server-side (gateway) address in every block.
pub const SERVER_OFFSET: u32 = 1;

/// First offset that may be handed to a client.
pub const FIRST_CLIENT_OFFSET: u32 = SERVER_OFFSET + 1;

/// IPv4 network block (base address + prefix length).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkBlock {
    /// Base (network) address of the block.
    address: Ipv4Addr,

    /// Prefix length (e.g., 24 for /24).
    prefix_len: u8,
}

impl NetworkBlock {
    /// Longest prefix that still leaves one client offset
    /// (network, server, client, broadcast).
    pub const MAX_PREFIX_LEN: u8 = 30;

    /// Create a new block. Host bits of `address` are masked off.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > Self::MAX_PREFIX_LEN {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} leaves no client addresses (maximum is {})",
                prefix_len,
                Self::MAX_PREFIX_LEN
            )));
        }

        Ok(Self {
            address: mask_ipv4(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "192.168.22.0/24").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.trim().split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Base address of the block.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length of the block.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an address is within this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == self.address
    }

    /// Number of addresses in this block, reserved ones included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Offset of the broadcast address.
    pub fn broadcast_offset(&self) -> u32 {
        (self.size() - 1) as u32
    }

    /// Highest offset that may be handed to a client.
    pub fn last_client_offset(&self) -> u32 {
        self.broadcast_offset() - 1
    }

    /// Number of offsets available to clients.
    pub fn client_capacity(&self) -> u64 {
        u64::from(self.last_client_offset() - FIRST_CLIENT_OFFSET) + 1
    }

    /// Whether `offset` is the network, server, or broadcast offset.
    pub fn is_reserved(&self, offset: u32) -> bool {
        offset == 0 || offset == SERVER_OFFSET || offset == self.broadcast_offset()
    }

    /// Address at `offset`, or `None` if the offset lies past the block.
    pub fn address_at(&self, offset: u32) -> Option<Ipv4Addr> {
        if u64::from(offset) >= self.size() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.address) + offset))
    }

    /// Offset of `addr`, or `None` if it is outside the block.
    pub fn offset_of(&self, addr: Ipv4Addr) -> Option<u32> {
        self.contains(addr)
            .then(|| u32::from(addr) - u32::from(self.address))
    }

    /// Server-side address shared by every link in the block.
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) + SERVER_OFFSET)
    }
}

impl std::fmt::Display for NetworkBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for NetworkBlock {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

/// Mask an IPv4 address to a prefix length.
fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from(addr);
    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    };
    Ipv4Addr::from(bits & mask)
}

// ============================================================================
// Address pool
// ============================================================================

/// Client/server address pair of one point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPair {
    /// Offset of the client (peer) address.
    pub client_offset: u32,

    /// Offset of the server (local) address.
    pub server_offset: u32,

    /// Client (peer) address.
    pub client: Ipv4Addr,

    /// Server (local) address.
    pub server: Ipv4Addr,
}

/// Lowest-free-first allocator of client offsets.
///
/// The pool keeps no state of its own between operations: callers rebuild
/// it from the current set of assignments with [`AddressPool::reserve`].
#[derive(Debug, Clone)]
pub struct AddressPool {
    /// Block to allocate from.
    block: NetworkBlock,

    /// Client offsets currently in use.
    assigned: BTreeSet<u32>,
}

impl AddressPool {
    /// Create an empty pool for a block.
    pub fn new(block: NetworkBlock) -> Self {
        Self {
            block,
            assigned: BTreeSet::new(),
        }
    }

    /// Mark a client address as in use.
    ///
    /// Returns `false` if the address was already marked.
    pub fn reserve(&mut self, addr: Ipv4Addr) -> Result<bool, NetworkError> {
        let Some(offset) = self.block.offset_of(addr) else {
            return Err(NetworkError::OutOfBlock {
                address: addr,
                block: self.block.to_string(),
            });
        };

        if self.block.is_reserved(offset) {
            return Err(NetworkError::Reserved {
                address: addr,
                block: self.block.to_string(),
            });
        }

        Ok(self.assigned.insert(offset))
    }

    /// Allocate the lowest free client offset.
    pub fn allocate(&mut self) -> Result<AddressPair, NetworkError> {
        let mut candidate = FIRST_CLIENT_OFFSET;
        for &taken in self.assigned.iter() {
            if taken != candidate {
                break;
            }
            candidate += 1;
        }

        if candidate > self.block.last_client_offset() {
            return Err(NetworkError::PoolExhausted(self.block.to_string()));
        }

        self.assigned.insert(candidate);
        Ok(self.pair(candidate))
    }

    /// Return a client offset to the pool.
    ///
    /// Releasing a free offset is a no-op. Returns whether anything changed.
    pub fn release(&mut self, client_offset: u32) -> bool {
        self.assigned.remove(&client_offset)
    }

    /// Number of client offsets still free.
    pub fn remaining(&self) -> u64 {
        self.block.client_capacity() - self.assigned.len() as u64
    }

    /// Get the block being allocated from.
    pub fn block(&self) -> &NetworkBlock {
        &self.block
    }

    fn pair(&self, client_offset: u32) -> AddressPair {
        AddressPair {
            client_offset,
            server_offset: SERVER_OFFSET,
            client: Ipv4Addr::from(u32::from(self.block.address) + client_offset),
            server: self.block.server_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block(cidr: &str) -> NetworkBlock {
        NetworkBlock::from_cidr(cidr).unwrap()
    }

    #[test]
    fn test_block_parsing() {
        let b = block("192.168.22.0/24");
        assert_eq!(b.address(), Ipv4Addr::new(192, 168, 22, 0));
        assert_eq!(b.prefix_len(), 24);
        assert_eq!(b.size(), 256);
        assert_eq!(b.to_string(), "192.168.22.0/24");
    }

    #[test]
    fn test_block_masks_host_bits() {
        let b = block("10.1.2.77/16");
        assert_eq!(b.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_block_rejects_bad_input() {
        assert!(matches!(
            NetworkBlock::from_cidr("192.168.22.0"),
            Err(NetworkError::InvalidPrefix(_))
        ));
        assert!(matches!(
            NetworkBlock::from_cidr("192.168.300.0/24"),
            Err(NetworkError::InvalidAddress(_))
        ));
        assert!(matches!(
            NetworkBlock::from_cidr("192.168.22.0/31"),
            Err(NetworkError::InvalidPrefix(_))
        ));
        assert!(matches!(
            NetworkBlock::from_cidr("192.168.22.0/x"),
            Err(NetworkError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_block_offsets() {
        let b = block("192.168.22.0/24");
        assert!(b.is_reserved(0));
        assert!(b.is_reserved(1));
        assert!(b.is_reserved(255));
        assert!(!b.is_reserved(2));
        assert_eq!(b.client_capacity(), 253);
        assert_eq!(b.server_address(), Ipv4Addr::new(192, 168, 22, 1));
        assert_eq!(b.offset_of(Ipv4Addr::new(192, 168, 22, 9)), Some(9));
        assert_eq!(b.offset_of(Ipv4Addr::new(192, 168, 23, 9)), None);
        assert_eq!(b.address_at(256), None);
    }

    #[test]
    fn test_whole_space_block() {
        let b = block("0.0.0.0/0");
        assert_eq!(b.size(), 1 << 32);
        assert_eq!(b.broadcast_offset(), u32::MAX);
        assert!(b.contains(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn test_allocates_lowest_first() {
        let mut pool = AddressPool::new(block("192.168.22.0/24"));

        let first = pool.allocate().unwrap();
        assert_eq!(first.client, Ipv4Addr::new(192, 168, 22, 2));
        assert_eq!(first.server, Ipv4Addr::new(192, 168, 22, 1));
        assert_eq!(first.server_offset, SERVER_OFFSET);

        let second = pool.allocate().unwrap();
        assert_eq!(second.client, Ipv4Addr::new(192, 168, 22, 3));

        assert!(pool.release(first.client_offset));
        let reused = pool.allocate().unwrap();
        assert_eq!(reused.client, first.client);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut pool = AddressPool::new(block("192.168.22.0/24"));
        let pair = pool.allocate().unwrap();

        assert!(pool.release(pair.client_offset));
        assert!(!pool.release(pair.client_offset));
        assert!(!pool.release(200));
        assert_eq!(pool.remaining(), 253);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = AddressPool::new(block("10.0.0.0/29"));

        let clients: Vec<_> = (0..5).map(|_| pool.allocate().unwrap().client_offset).collect();
        assert_eq!(clients, vec![2, 3, 4, 5, 6]);
        assert_eq!(pool.remaining(), 0);

        assert_eq!(
            pool.allocate(),
            Err(NetworkError::PoolExhausted("10.0.0.0/29".to_string()))
        );
    }

    #[test]
    fn test_reserve_rebuilds_state() {
        let b = block("192.168.22.0/24");
        let mut pool = AddressPool::new(b);

        assert!(pool.reserve(Ipv4Addr::new(192, 168, 22, 2)).unwrap());
        assert!(pool.reserve(Ipv4Addr::new(192, 168, 22, 4)).unwrap());
        assert!(!pool.reserve(Ipv4Addr::new(192, 168, 22, 4)).unwrap());

        // Fills the gap before moving past the highest assignment.
        assert_eq!(pool.allocate().unwrap().client_offset, 3);
        assert_eq!(pool.allocate().unwrap().client_offset, 5);
    }

    #[test]
    fn test_reserve_rejects_foreign_and_reserved() {
        let mut pool = AddressPool::new(block("192.168.22.0/24"));

        assert!(matches!(
            pool.reserve(Ipv4Addr::new(10, 0, 0, 2)),
            Err(NetworkError::OutOfBlock { .. })
        ));
        assert!(matches!(
            pool.reserve(Ipv4Addr::new(192, 168, 22, 1)),
            Err(NetworkError::Reserved { .. })
        ));
        assert!(matches!(
            pool.reserve(Ipv4Addr::new(192, 168, 22, 255)),
            Err(NetworkError::Reserved { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_allocations_are_disjoint_and_inside(prefix in 22u8..=30, count in 0usize..64) {
            let b = NetworkBlock::new(Ipv4Addr::new(172, 16, 0, 0), prefix).unwrap();
            let mut pool = AddressPool::new(b);
            let mut seen = BTreeSet::new();

            for _ in 0..count {
                match pool.allocate() {
                    Ok(pair) => {
                        prop_assert!(b.contains(pair.client));
                        prop_assert!(!b.is_reserved(pair.client_offset));
                        prop_assert_eq!(pair.server, b.server_address());
                        prop_assert!(seen.insert(pair.client));
                    }
                    Err(NetworkError::PoolExhausted(_)) => {
                        prop_assert_eq!(seen.len() as u64, b.client_capacity());
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
        }
    }
}
