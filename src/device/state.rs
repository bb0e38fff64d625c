use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::device::types::{Device, DeviceListFilter};

/// What [`DiscoveryState::record`] did with a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    Added,
    Updated,
    /// Same device with nothing new to say about it.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
}

impl MergeSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0
    }
}

/// Devices seen during one scan, in the order they were first seen.
///
/// Keyed by [`Device::id`]; a device that is seen again keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryState {
    devices: IndexMap<String, Device>,
    generation: u64,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of emissions this state went through since it was created.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn to_vec(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    /// Devices passing `filter`, in first-seen order.
    pub fn filtered<'a>(&'a self, filter: &'a DeviceListFilter) -> impl Iterator<Item = &'a Device> + 'a {
        self.devices.values().filter(move |device| filter.matches(device))
    }

    /// Appends a device that was not seen before. A device that was seen before keeps its
    /// position and gets its name and signal strength refreshed.
    pub fn record(&mut self, device: Device) -> Sighting {
        match self.devices.entry(device.id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().update(device) {
                    Sighting::Updated
                } else {
                    Sighting::Unchanged
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(device);
                Sighting::Added
            },
        }
    }

    /// Applies [`Self::record`] to every device in arrival order.
    pub fn merge<I>(&mut self, devices: I) -> MergeSummary
    where
        I: IntoIterator<Item = Device>,
    {
        devices.into_iter().fold(MergeSummary::default(), |mut summary, device| {
            match self.record(device) {
                Sighting::Added => summary.added += 1,
                Sighting::Updated => summary.updated += 1,
                Sighting::Unchanged => {},
            }
            summary
        })
    }

    /// Forgets every device. Returns false if there was nothing to forget.
    pub fn clear(&mut self) -> bool {
        let had_devices = !self.devices.is_empty();
        self.devices.clear();
        had_devices
    }

    pub(crate) fn mark_emitted(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(state: &DiscoveryState) -> Vec<&str> {
        state.devices().map(|device| device.id.as_str()).collect()
    }

    #[test]
    fn re_seen_device_keeps_its_position() {
        let mut state = DiscoveryState::new();
        assert_eq!(state.record(Device::new("A").with_rssi(-90)), Sighting::Added);
        assert_eq!(state.record(Device::new("B")), Sighting::Added);
        assert_eq!(state.record(Device::new("A").with_name("HRM").with_rssi(-40)), Sighting::Updated);
        assert_eq!(state.record(Device::new("A")), Sighting::Unchanged);

        assert_eq!(ids(&state), vec!["A", "B"]);
        let a = state.get("A").unwrap();
        assert_eq!(a.name.as_deref(), Some("HRM"));
        assert_eq!(a.rssi, Some(-40));
        assert_eq!(a.highest_rssi, Some(-40));
    }

    #[test]
    fn merge_counts_new_devices_and_dedups_within_batch() {
        let mut state = DiscoveryState::new();
        state.record(Device::new("A"));

        let summary = state.merge(vec![
            Device::new("B"),
            Device::new("A"),
            Device::new("C"),
            Device::new("B").with_name("named later"),
        ]);

        assert_eq!(summary, MergeSummary { added: 2, updated: 1 });
        assert_eq!(ids(&state), vec!["A", "B", "C"]);
    }

    #[test]
    fn merge_of_nothing_changes_nothing() {
        let mut state = DiscoveryState::new();
        assert!(state.merge(Vec::new()).is_empty());
        assert!(state.is_empty());
        assert_eq!(state.generation(), 0);
    }

    #[test]
    fn never_holds_duplicate_ids() {
        let mut state = DiscoveryState::new();
        let pattern = ["X", "Y", "X", "Z", "Y", "Y", "W", "X"];

        for (round, id) in pattern.iter().enumerate() {
            if round % 3 == 0 {
                state.merge(pattern.iter().take(round).map(|id| Device::new(*id)));
            } else {
                state.record(Device::new(*id));
            }
        }

        let mut seen = ids(&state);
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(ids(&state), vec!["Y", "X", "Z"]);
    }

    #[test]
    fn filtered_view_follows_strongest_signal() {
        let mut state = DiscoveryState::new();
        state.merge(vec![Device::new("A").with_rssi(-80), Device::new("B").with_rssi(-45)]);

        let nearby = DeviceListFilter { nearby_only: true, name_prefix: None };
        let shown: Vec<_> = state.filtered(&nearby).map(|device| device.id.as_str()).collect();
        assert_eq!(shown, vec!["B"]);

        // A came closer once, then moved away again; it stays listed
        state.record(Device::new("A").with_rssi(-30));
        state.record(Device::new("A").with_rssi(-85));
        let shown: Vec<_> = state.filtered(&nearby).map(|device| device.id.as_str()).collect();
        assert_eq!(shown, vec!["A", "B"]);
    }

    #[test]
    fn clear_forgets_devices_but_not_generation() {
        let mut state = DiscoveryState::new();
        assert!(!state.clear());

        state.record(Device::new("A"));
        state.mark_emitted();
        assert!(state.clear());
        assert!(state.is_empty());
        assert_eq!(state.generation(), 1);
    }
}
