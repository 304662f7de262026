use std::net::IpAddr;

use ipnet::IpNet;

/// Binary prefix trie answering "is this address covered by any listed
/// network?".
///
/// IPv4 and IPv6 live under separate roots. Addresses are walked most
/// significant bit first as a left-aligned `u128`, so no per-lookup
/// allocation is needed.
#[derive(Default)]
pub struct PrefixSet {
    v4: Node,
    v6: Node,
    entries: usize,
}

#[derive(Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    covers: bool,
}

/// Address bits left-aligned in a `u128`, plus the address width.
fn address_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

fn bit_at(bits: u128, depth: u8) -> usize {
    ((bits >> (127 - depth as u32)) & 1) as usize
}

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network. Re-adding an already covered prefix is a no-op for
    /// [`len`](Self::len).
    pub fn insert(&mut self, network: IpNet) {
        let (bits, _) = address_bits(network.network());
        let mut node = match network {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        };

        for depth in 0..network.prefix_len() {
            node = &mut **node.children[bit_at(bits, depth)].get_or_insert_with(Box::default);
        }

        if !node.covers {
            node.covers = true;
            self.entries += 1;
        }
    }

    /// Returns `true` if any inserted network contains `addr`.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let (bits, width) = address_bits(addr);
        let mut node = match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        };

        for depth in 0..width {
            if node.covers {
                return true;
            }
            match &node.children[bit_at(bits, depth)] {
                Some(child) => node = &**child,
                None => return false,
            }
        }

        node.covers
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(networks: &[&str]) -> PrefixSet {
        let mut set = PrefixSet::new();
        for n in networks {
            set.insert(n.parse().unwrap());
        }
        set
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = PrefixSet::new();
        assert!(set.is_empty());
        assert!(!set.contains("10.0.0.1".parse().unwrap()));
        assert!(!set.contains("::1".parse().unwrap()));
    }

    #[test]
    fn host_route_matches_only_itself() {
        let set = set(&["10.0.0.1/32"]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("10.0.0.1".parse().unwrap()));
        assert!(!set.contains("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn cidr_boundaries() {
        let set = set(&["192.168.1.0/24", "172.16.0.0/12"]);
        assert!(set.contains("192.168.1.0".parse().unwrap()));
        assert!(set.contains("192.168.1.255".parse().unwrap()));
        assert!(!set.contains("192.168.2.0".parse().unwrap()));
        assert!(set.contains("172.31.255.255".parse().unwrap()));
        assert!(!set.contains("172.32.0.0".parse().unwrap()));
    }

    #[test]
    fn default_route_matches_family() {
        let set = set(&["0.0.0.0/0"]);
        assert!(set.contains("8.8.8.8".parse().unwrap()));
        assert!(!set.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn families_do_not_mix() {
        let set = set(&["10.0.0.0/8", "fd00::/8"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("fdff:ffff::1".parse().unwrap()));
        assert!(!set.contains("fe00::1".parse().unwrap()));
        assert!(!set.contains("11.0.0.1".parse().unwrap()));
        // ::a00:1 shares its low 32 bits with 10.0.0.1
        assert!(!set.contains("::a00:1".parse().unwrap()));
    }

    #[test]
    fn duplicate_insert_counts_once() {
        let set = set(&["10.0.0.0/8", "10.0.0.0/8", "10.0.0.0/24"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("10.1.0.1".parse().unwrap()));
    }
}
