//! Fixed-capacity registry of multicast sessions.

use loramac_codec::keys::{AppSKey, NwkSKey};
use loramac_codec::parser::DevAddr;

pub const MAX_MULTICAST: usize = 4;

/// One multicast group: address, keys and its own downlink counter.
/// Immutable after registration, except for the counter.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct MulticastGroup {
    pub devaddr: DevAddr<[u8; 4]>,
    pub nwkskey: NwkSKey,
    pub appskey: AppSKey,
    pub(crate) fcnt_down: u32,
}

impl MulticastGroup {
    pub fn new(devaddr: DevAddr<[u8; 4]>, nwkskey: NwkSKey, appskey: AppSKey) -> Self {
        Self { devaddr, nwkskey, appskey, fcnt_down: 0 }
    }

    pub fn fcnt_down(&self) -> u32 {
        self.fcnt_down
    }
}

#[derive(Default)]
pub(crate) struct MulticastRegistry {
    groups: [Option<MulticastGroup>; MAX_MULTICAST],
    active: u8,
}

impl MulticastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group under `id`. Fails when the slot is taken; entries
    /// cannot be modified, only removed and re-added.
    pub fn register(&mut self, id: usize, group: MulticastGroup) -> bool {
        if id >= MAX_MULTICAST || self.groups[id].is_some() {
            return false;
        }
        self.groups[id] = Some(group);
        self.active |= 1 << id;
        true
    }

    pub fn deregister(&mut self, id: usize) -> bool {
        if id >= MAX_MULTICAST {
            return false;
        }
        self.active &= !(1 << id);
        self.groups[id].take().is_some()
    }

    pub fn lookup_mut(&mut self, devaddr: &[u8]) -> Option<&mut MulticastGroup> {
        let active = self.active;
        self.groups
            .iter_mut()
            .enumerate()
            .filter(move |(id, _)| active & (1 << id) != 0)
            .filter_map(|(_, g)| g.as_mut())
            .find(|g| g.devaddr.as_ref() == devaddr)
    }

    /// Session teardown resets every group's downlink counter.
    pub fn reset_counters(&mut self) {
        for group in self.groups.iter_mut().flatten() {
            group.fcnt_down = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(addr: u32) -> MulticastGroup {
        MulticastGroup::new(DevAddr::from(addr), NwkSKey::from([1; 16]), AppSKey::from([2; 16]))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = MulticastRegistry::new();
        assert!(registry.register(0, group(0x11223344)));
        assert!(registry.register(3, group(0x55667788)));

        let addr = DevAddr::from(0x11223344u32);
        assert!(registry.lookup_mut(addr.as_ref()).is_some());
        let other = DevAddr::from(0x99999999u32);
        assert!(registry.lookup_mut(other.as_ref()).is_none());
    }

    #[test]
    fn slots_are_immutable_while_occupied() {
        let mut registry = MulticastRegistry::new();
        assert!(registry.register(1, group(1)));
        assert!(!registry.register(1, group(2)));
        assert!(registry.deregister(1));
        assert!(!registry.deregister(1));
        assert!(registry.register(1, group(2)));
    }

    #[test]
    fn counters_reset_on_session_teardown() {
        let mut registry = MulticastRegistry::new();
        registry.register(0, group(7));
        let addr = DevAddr::from(7u32);
        registry.lookup_mut(addr.as_ref()).unwrap().fcnt_down = 42;
        registry.reset_counters();
        assert_eq!(registry.lookup_mut(addr.as_ref()).unwrap().fcnt_down, 0);
    }
}
