use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::task::JoinHandle;

use crate::barrier::Producer;
use crate::channel::ListenerId;
use crate::error::{BarrierError, Result};

/// Stable caller-chosen identity of a registered producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProducerId(u64);

impl ProducerId {
	/// Wraps a raw handle.
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw handle.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl From<u64> for ProducerId {
	fn from(raw: u64) -> Self {
		Self(raw)
	}
}

impl fmt::Display for ProducerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "producer#{}", self.0)
	}
}

pub(crate) type ContributionTask<T> = JoinHandle<anyhow::Result<Vec<T>>>;

/// Contribution state of one entry.
pub(crate) enum Slot<T> {
	/// Nothing posted since the last round closed.
	Idle,
	/// Operation started for the collecting round.
	Pending(ContributionTask<T>),
	/// Task moved into a resolving round.
	Claimed,
}

pub(crate) struct Entry<T> {
	pub(crate) producer: Arc<dyn Producer<T>>,
	pub(crate) listener: ListenerId,
	pub(crate) slot: Slot<T>,
}

/// Registered producers in registration order.
pub(crate) struct ProducerRegistry<T> {
	entries: IndexMap<ProducerId, Entry<T>>,
}

impl<T> ProducerRegistry<T> {
	pub(crate) fn new() -> Self {
		Self { entries: IndexMap::new() }
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	pub(crate) fn contains(&self, id: ProducerId) -> bool {
		self.entries.contains_key(&id)
	}

	pub(crate) fn ids(&self) -> Vec<ProducerId> {
		self.entries.keys().copied().collect()
	}

	pub(crate) fn max_id(&self) -> Option<ProducerId> {
		self.entries.keys().copied().max()
	}

	pub(crate) fn insert(&mut self, id: ProducerId, producer: Arc<dyn Producer<T>>, listener: ListenerId) -> Result<()> {
		if self.entries.contains_key(&id) {
			return Err(BarrierError::DuplicateRegistration(id));
		}
		self.entries.insert(
			id,
			Entry {
				producer,
				listener,
				slot: Slot::Idle,
			},
		);
		Ok(())
	}

	/// Removes an entry, keeping the order of the remaining ones.
	pub(crate) fn remove(&mut self, id: ProducerId) -> Result<Entry<T>> {
		self.entries.shift_remove(&id).ok_or(BarrierError::NotRegistered(id))
	}

	/// Returns the producer if it may contribute right now.
	pub(crate) fn contributor(&self, id: ProducerId) -> Result<Arc<dyn Producer<T>>> {
		let entry = self.entries.get(&id).ok_or(BarrierError::NotRegistered(id))?;
		match entry.slot {
			Slot::Idle => Ok(Arc::clone(&entry.producer)),
			Slot::Pending(_) | Slot::Claimed => Err(BarrierError::DuplicateContribution(id)),
		}
	}

	/// Stores a started contribution. The task is aborted if it cannot be stored.
	pub(crate) fn post(&mut self, id: ProducerId, task: ContributionTask<T>) -> Result<()> {
		let Some(entry) = self.entries.get_mut(&id) else {
			task.abort();
			return Err(BarrierError::NotRegistered(id));
		};
		if !matches!(entry.slot, Slot::Idle) {
			task.abort();
			return Err(BarrierError::DuplicateContribution(id));
		}
		entry.slot = Slot::Pending(task);
		Ok(())
	}

	pub(crate) fn any_pending(&self) -> bool {
		self.entries.values().any(|e| matches!(e.slot, Slot::Pending(_)))
	}

	/// True when every entry holds a pending contribution (vacuously true when empty).
	pub(crate) fn all_pending(&self) -> bool {
		self.entries.values().all(|e| matches!(e.slot, Slot::Pending(_)))
	}

	/// Moves every pending task out, in registration order.
	pub(crate) fn claim_all(&mut self) -> Vec<(ProducerId, ContributionTask<T>)> {
		let mut claimed = Vec::with_capacity(self.entries.len());
		for (id, entry) in &mut self.entries {
			if let Slot::Pending(task) = std::mem::replace(&mut entry.slot, Slot::Claimed) {
				claimed.push((*id, task));
			}
		}
		claimed
	}

	/// Returns claimed entries to idle. Contributions posted since the claim stay.
	pub(crate) fn release_claimed(&mut self) {
		for entry in self.entries.values_mut() {
			if matches!(entry.slot, Slot::Claimed) {
				entry.slot = Slot::Idle;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::Channel;

	fn producer() -> Arc<dyn Producer<u32>> {
		Arc::new(|| async { Ok::<_, anyhow::Error>(vec![0u32]) })
	}

	fn registry_with(ids: &[u64]) -> (ProducerRegistry<u32>, Channel) {
		let channel = Channel::new("test");
		let mut registry = ProducerRegistry::new();
		for &raw in ids {
			let listener = channel.subscribe(|| {});
			registry.insert(ProducerId::new(raw), producer(), listener).unwrap();
		}
		(registry, channel)
	}

	fn idle_task() -> ContributionTask<u32> {
		tokio::spawn(async { Ok::<_, anyhow::Error>(Vec::new()) })
	}

	#[test]
	fn duplicate_insert_leaves_registry_unchanged() {
		let (mut registry, channel) = registry_with(&[1, 2]);
		let listener = channel.subscribe(|| {});
		let err = registry.insert(ProducerId::new(1), producer(), listener).unwrap_err();
		assert_eq!(err, BarrierError::DuplicateRegistration(ProducerId::new(1)));
		assert_eq!(registry.ids(), vec![ProducerId::new(1), ProducerId::new(2)]);
	}

	#[test]
	fn remove_keeps_registration_order() {
		let (mut registry, _channel) = registry_with(&[3, 1, 2]);
		registry.remove(ProducerId::new(1)).unwrap();
		assert_eq!(registry.ids(), vec![ProducerId::new(3), ProducerId::new(2)]);
		assert_eq!(registry.remove(ProducerId::new(1)).err(), Some(BarrierError::NotRegistered(ProducerId::new(1))));
		assert_eq!(registry.max_id(), Some(ProducerId::new(3)));
	}

	#[tokio::test]
	async fn completion_requires_every_entry_pending() {
		let (mut registry, _channel) = registry_with(&[1, 2]);
		assert!(!registry.any_pending());

		registry.post(ProducerId::new(1), idle_task()).unwrap();
		assert!(registry.any_pending());
		assert!(!registry.all_pending());
		assert!(registry.contributor(ProducerId::new(1)).is_err());

		registry.post(ProducerId::new(2), idle_task()).unwrap();
		assert!(registry.all_pending());

		let claimed: Vec<_> = registry.claim_all().into_iter().map(|(id, _)| id).collect();
		assert_eq!(claimed, vec![ProducerId::new(1), ProducerId::new(2)]);
		assert!(!registry.any_pending());
		assert_eq!(
			registry.post(ProducerId::new(1), idle_task()).unwrap_err(),
			BarrierError::DuplicateContribution(ProducerId::new(1))
		);

		registry.release_claimed();
		assert!(registry.contributor(ProducerId::new(1)).is_ok());
	}

	#[tokio::test]
	async fn posting_for_unknown_producer_fails() {
		let (mut registry, _channel) = registry_with(&[]);
		assert!(registry.all_pending());
		assert_eq!(
			registry.post(ProducerId::new(9), idle_task()).unwrap_err(),
			BarrierError::NotRegistered(ProducerId::new(9))
		);
	}
}
