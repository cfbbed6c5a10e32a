//! Peer Selection
//!
//! Chooses peer targets per operation kind. Install broadcasts to every
//! peer of every organization, instantiate/upgrade go to the client
//! organization's anchor peer, invoke spreads load with a uniformly random
//! client peer, and query leaves the choice to channel discovery.

use crate::fabric::Peer;
use crate::{LifecycleError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Draw one peer uniformly from `peers` using `rng`
///
/// A single-peer set is returned without consulting the generator.
pub fn select_random_with<'a, R>(peers: &'a [Peer], rng: &mut R) -> Option<&'a Peer>
where
    R: Rng + ?Sized,
{
    match peers.len() {
        0 => None,
        1 => peers.first(),
        len => peers.get(rng.gen_range(0..len)),
    }
}

/// Peer selector shared by the lifecycle operations of one broker
pub struct PeerSelector {
    rng: Mutex<StdRng>,
}

impl PeerSelector {
    /// Selector seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Selector with a fixed seed, for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Every configured peer of every organization
    pub fn select_for_install(
        &self,
        peers_by_org: &BTreeMap<String, Vec<Peer>>,
    ) -> BTreeMap<String, Vec<Peer>> {
        peers_by_org.clone()
    }

    /// First peer of the client organization
    pub fn select_for_anchor(&self, client_org_peers: &[Peer]) -> Result<Peer> {
        client_org_peers
            .first()
            .cloned()
            .ok_or_else(|| LifecycleError::config("Client organization has no peers"))
    }

    /// One uniformly random peer
    pub fn select_random(&self, peers: &[Peer]) -> Result<Peer> {
        let mut rng = self.rng.lock();
        select_random_with(peers, &mut *rng)
            .cloned()
            .ok_or_else(|| LifecycleError::config("No peers to select from"))
    }
}

impl Default for PeerSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn peers(n: usize) -> Vec<Peer> {
        (0..n)
            .map(|i| Peer::new(format!("peer{}.orga", i), format!("grpcs://localhost:{}", 7051 + i), "OrgA"))
            .collect()
    }

    #[test]
    fn test_single_peer_is_deterministic() {
        let selector = PeerSelector::with_seed(7);
        let only = peers(1);
        for _ in 0..50 {
            assert_eq!(selector.select_random(&only).unwrap().name(), "peer0.orga");
        }
    }

    #[test]
    fn test_random_covers_every_peer() {
        let selector = PeerSelector::with_seed(42);
        let set = peers(3);

        let seen: HashSet<String> = (0..300)
            .map(|_| selector.select_random(&set).unwrap().name().to_string())
            .collect();

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_empty_sets_are_config_errors() {
        let selector = PeerSelector::new();
        assert_eq!(selector.select_random(&[]).unwrap_err().category(), "config");
        assert_eq!(selector.select_for_anchor(&[]).unwrap_err().category(), "config");
    }

    #[test]
    fn test_anchor_is_first_peer() {
        let selector = PeerSelector::new();
        let set = peers(3);
        assert_eq!(selector.select_for_anchor(&set).unwrap(), set[0]);
    }

    #[test]
    fn test_install_targets_every_org_and_peer() {
        let selector = PeerSelector::new();
        let mut by_org = BTreeMap::new();
        by_org.insert("OrgA".to_string(), peers(2));
        by_org.insert("OrgB".to_string(), vec![Peer::new("peer0.orgb", "grpcs://localhost:9051", "OrgB")]);

        let targets = selector.select_for_install(&by_org);
        assert_eq!(targets, by_org);
    }

    proptest! {
        #[test]
        fn prop_selection_stays_in_range(n in 1usize..32, seed in any::<u64>()) {
            let set = peers(n);
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..16 {
                let picked = select_random_with(&set, &mut rng).unwrap();
                prop_assert!(set.contains(picked));
            }
        }
    }
}
