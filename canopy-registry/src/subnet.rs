//! IPv6 subnet math and the per-organization block allocator.
//!
//! Organizations receive /64 blocks carved out of a ULA /48. Block ids are
//! assigned lowest-first starting at 1; block 0 is reserved for the
//! rendezvous gateway, whose mesh address is `<prefix>::1`.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Default ULA space for a deployment.
pub const DEFAULT_ULA_PREFIX: &str = "fd6c:1f2e:3d4c::/48";

/// Prefix length of per-organization blocks.
pub const ORG_PREFIX_LEN: u8 = 64;

/// A contiguous IPv6 address block in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv6Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Creates a subnet, masking any host bits off the network address.
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> RegistryResult<Self> {
        if prefix_len == 0 || prefix_len > 128 {
            return Err(RegistryError::InvalidSubnet(format!(
                "prefix length out of range: /{prefix_len}"
            )));
        }
        let mask = Self::mask(prefix_len);
        Ok(Self {
            network: Ipv6Addr::from(u128::from(addr) & mask),
            prefix_len,
        })
    }

    fn mask(prefix_len: u8) -> u128 {
        if prefix_len == 128 {
            u128::MAX
        } else {
            !(u128::MAX >> prefix_len)
        }
    }

    /// The network address of the block.
    #[must_use]
    pub fn network(&self) -> Ipv6Addr {
        self.network
    }

    /// The prefix length of the block.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the block (saturating at `u128::MAX`).
    #[must_use]
    pub fn capacity(&self) -> u128 {
        1u128
            .checked_shl(u32::from(128 - self.prefix_len))
            .unwrap_or(u128::MAX)
    }

    /// Returns true if the address lies inside the block.
    #[must_use]
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        u128::from(addr) & Self::mask(self.prefix_len) == u128::from(self.network)
    }

    /// The address at the given offset into the block, or `None` past the
    /// end.
    #[must_use]
    pub fn addr_at(&self, offset: u128) -> Option<Ipv6Addr> {
        if offset >= self.capacity() {
            return None;
        }
        Some(Ipv6Addr::from(u128::from(self.network) + offset))
    }

    /// The offset of an address inside the block, or `None` if outside.
    #[must_use]
    pub fn offset_of(&self, addr: Ipv6Addr) -> Option<u128> {
        self.contains(addr)
            .then(|| u128::from(addr) - u128::from(self.network))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| RegistryError::InvalidSubnet(format!("missing prefix length: {s}")))?;
        let addr: Ipv6Addr = addr
            .parse()
            .map_err(|e| RegistryError::InvalidSubnet(format!("{s}: {e}")))?;
        let len: u8 = len
            .parse()
            .map_err(|e| RegistryError::InvalidSubnet(format!("{s}: {e}")))?;
        Self::new(addr, len)
    }
}

impl TryFrom<String> for Subnet {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Subnet> for String {
    fn from(s: Subnet) -> String {
        s.to_string()
    }
}

/// Hands out /64 blocks from the ULA space, lowest unused id first.
///
/// The allocator itself is stateless over a set of already-allocated
/// blocks; callers serialize allocation (spec: a single allocation
/// critical section) so concurrent creations never overlap.
#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    base: Subnet,
}

impl SubnetAllocator {
    /// Creates an allocator over a base block. The base prefix must be
    /// shorter than [`ORG_PREFIX_LEN`].
    pub fn new(base: Subnet) -> RegistryResult<Self> {
        if base.prefix_len() >= ORG_PREFIX_LEN {
            return Err(RegistryError::InvalidSubnet(format!(
                "base prefix /{} leaves no room for /{ORG_PREFIX_LEN} blocks",
                base.prefix_len()
            )));
        }
        Ok(Self { base })
    }

    /// The base block the allocator carves from.
    #[must_use]
    pub fn base(&self) -> Subnet {
        self.base
    }

    /// The rendezvous gateway address, `<prefix>::1` in reserved block 0.
    #[must_use]
    pub fn gateway_address(&self) -> Ipv6Addr {
        Ipv6Addr::from(u128::from(self.base.network()) + 1)
    }

    fn block_count(&self) -> u128 {
        1u128
            .checked_shl(u32::from(ORG_PREFIX_LEN - self.base.prefix_len()))
            .unwrap_or(u128::MAX)
    }

    fn block_at(&self, id: u128) -> RegistryResult<Subnet> {
        let offset = id << (128 - u32::from(ORG_PREFIX_LEN));
        Subnet::new(
            Ipv6Addr::from(u128::from(self.base.network()) + offset),
            ORG_PREFIX_LEN,
        )
    }

    /// The id of a block inside the base space, or `None` if it is not
    /// one of this allocator's blocks.
    #[must_use]
    pub fn block_id(&self, subnet: &Subnet) -> Option<u128> {
        if subnet.prefix_len() != ORG_PREFIX_LEN || !self.base.contains(subnet.network()) {
            return None;
        }
        Some(
            (u128::from(subnet.network()) - u128::from(self.base.network()))
                >> (128 - u32::from(ORG_PREFIX_LEN)),
        )
    }

    /// Allocates the lowest unused block id, skipping reserved block 0.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SubnetsExhausted`] when every id is taken.
    pub fn allocate(&self, used: impl IntoIterator<Item = Subnet>) -> RegistryResult<Subnet> {
        let mut used_ids: Vec<u128> = used
            .into_iter()
            .filter_map(|s| self.block_id(&s))
            .collect();
        used_ids.sort_unstable();
        used_ids.dedup();

        let mut candidate: u128 = 1;
        for id in used_ids {
            if id < candidate {
                continue;
            }
            if id > candidate {
                break;
            }
            candidate += 1;
        }
        if candidate >= self.block_count() {
            return Err(RegistryError::SubnetsExhausted);
        }
        self.block_at(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> SubnetAllocator {
        SubnetAllocator::new(DEFAULT_ULA_PREFIX.parse().unwrap()).unwrap()
    }

    #[test]
    fn parse_and_display_round_trip() {
        let s: Subnet = "fd6c:1f2e:3d4c:1::/64".parse().unwrap();
        assert_eq!(s.to_string(), "fd6c:1f2e:3d4c:1::/64");
        assert_eq!(s.prefix_len(), 64);
    }

    #[test]
    fn host_bits_are_masked() {
        let s: Subnet = "fd6c:1f2e:3d4c:1::42/64".parse().unwrap();
        assert_eq!(s.to_string(), "fd6c:1f2e:3d4c:1::/64");
    }

    #[test]
    fn bad_notation_rejected() {
        assert!("fd6c::".parse::<Subnet>().is_err());
        assert!("fd6c::/0".parse::<Subnet>().is_err());
        assert!("fd6c::/129".parse::<Subnet>().is_err());
        assert!("not-an-addr/64".parse::<Subnet>().is_err());
    }

    #[test]
    fn contains_and_offsets() {
        let s: Subnet = "fd6c:1f2e:3d4c:1::/64".parse().unwrap();
        let inside: Ipv6Addr = "fd6c:1f2e:3d4c:1::5".parse().unwrap();
        let outside: Ipv6Addr = "fd6c:1f2e:3d4c:2::5".parse().unwrap();
        assert!(s.contains(inside));
        assert!(!s.contains(outside));
        assert_eq!(s.offset_of(inside), Some(5));
        assert_eq!(s.addr_at(5), Some(inside));
    }

    #[test]
    fn first_allocation_skips_reserved_block() {
        let alloc = allocator();
        let first = alloc.allocate([]).unwrap();
        assert_eq!(first.to_string(), "fd6c:1f2e:3d4c:1::/64");
    }

    #[test]
    fn lowest_free_id_wins() {
        let alloc = allocator();
        let used: Vec<Subnet> = ["fd6c:1f2e:3d4c:1::/64", "fd6c:1f2e:3d4c:3::/64"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let next = alloc.allocate(used).unwrap();
        assert_eq!(next.to_string(), "fd6c:1f2e:3d4c:2::/64");
    }

    #[test]
    fn gateway_address_in_reserved_block() {
        let alloc = allocator();
        assert_eq!(alloc.gateway_address().to_string(), "fd6c:1f2e:3d4c::1");
    }

    #[test]
    fn exhaustion_reported() {
        // A /63 base leaves exactly one usable /64 after the reserved one.
        let alloc = SubnetAllocator::new("fd6c:1f2e:3d4c::/63".parse().unwrap()).unwrap();
        let first = alloc.allocate([]).unwrap();
        let err = alloc.allocate([first]).unwrap_err();
        assert!(matches!(err, RegistryError::SubnetsExhausted));
    }
}
