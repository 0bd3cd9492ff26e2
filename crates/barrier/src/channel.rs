//! Named broadcast signal without payload.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle identifying one subscription on a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

struct Listeners {
	entries: Vec<(ListenerId, Listener)>,
	next_id: u64,
}

/// Publish/subscribe signal: [`fire`](Self::fire) invokes every subscribed listener.
///
/// Listeners are invoked from a snapshot taken when the fire starts, with no
/// lock held. Subscribing or unsubscribing from inside a listener is allowed
/// and only affects later fires.
pub struct Channel {
	name: Arc<str>,
	listeners: Mutex<Listeners>,
}

impl fmt::Debug for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Channel").field("name", &self.name).field("listeners", &self.len()).finish()
	}
}

impl Channel {
	/// Creates a channel with no listeners.
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self {
			name: name.into(),
			listeners: Mutex::new(Listeners {
				entries: Vec::new(),
				next_id: 0,
			}),
		}
	}

	/// Returns the channel name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Adds a listener and returns its handle.
	pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
		let mut listeners = self.listeners.lock();
		let id = ListenerId(listeners.next_id);
		listeners.next_id += 1;
		listeners.entries.push((id, Arc::new(listener)));
		tracing::trace!(channel = %self.name, listener = id.0, "channel.subscribe");
		id
	}

	/// Removes a listener. Returns `false` if the handle was not subscribed.
	pub fn unsubscribe(&self, id: ListenerId) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.entries.len();
		listeners.entries.retain(|(lid, _)| *lid != id);
		let removed = listeners.entries.len() != before;
		tracing::trace!(channel = %self.name, listener = id.0, removed, "channel.unsubscribe");
		removed
	}

	/// Invokes every listener subscribed at the time of the call.
	///
	/// A panicking listener is logged and skipped; the remaining listeners
	/// still run. Returns the number of listeners invoked.
	pub fn fire(&self) -> usize {
		let snapshot: Vec<(ListenerId, Listener)> = self.listeners.lock().entries.iter().map(|(id, l)| (*id, Arc::clone(l))).collect();
		tracing::trace!(channel = %self.name, listeners = snapshot.len(), "channel.fire");
		for (id, listener) in &snapshot {
			if panic::catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
				tracing::error!(channel = %self.name, listener = id.0, "channel.listener.panicked");
			}
		}
		snapshot.len()
	}

	/// Returns the number of subscribed listeners.
	pub fn len(&self) -> usize {
		self.listeners.lock().entries.len()
	}

	/// Returns `true` if nothing is subscribed.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[test]
	fn fire_invokes_every_listener() {
		let channel = Channel::new("test");
		let hits = Arc::new(AtomicUsize::new(0));
		for _ in 0..3 {
			let hits = Arc::clone(&hits);
			channel.subscribe(move || {
				hits.fetch_add(1, Ordering::SeqCst);
			});
		}

		assert_eq!(channel.fire(), 3);
		assert_eq!(hits.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn unsubscribe_stops_delivery() {
		let channel = Channel::new("test");
		let hits = Arc::new(AtomicUsize::new(0));
		let id = {
			let hits = Arc::clone(&hits);
			channel.subscribe(move || {
				hits.fetch_add(1, Ordering::SeqCst);
			})
		};

		assert!(channel.unsubscribe(id));
		assert!(!channel.unsubscribe(id));
		assert_eq!(channel.fire(), 0);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
		assert!(channel.is_empty());
	}

	#[test]
	fn mutation_during_fire_applies_to_next_fire() {
		let channel = Arc::new(Channel::new("test"));
		let hits = Arc::new(AtomicUsize::new(0));

		let late = {
			let hits = Arc::clone(&hits);
			channel.subscribe(move || {
				hits.fetch_add(10, Ordering::SeqCst);
			})
		};
		{
			let weak = Arc::downgrade(&channel);
			let hits = Arc::clone(&hits);
			channel.subscribe(move || {
				hits.fetch_add(1, Ordering::SeqCst);
				if let Some(channel) = weak.upgrade() {
					channel.unsubscribe(late);
					let hits = Arc::clone(&hits);
					channel.subscribe(move || {
						hits.fetch_add(100, Ordering::SeqCst);
					});
				}
			});
		}

		// The unsubscribed listener still runs in this pass, the new one does not.
		assert_eq!(channel.fire(), 2);
		assert_eq!(hits.load(Ordering::SeqCst), 11);
		assert_eq!(channel.len(), 2);
	}

	#[test]
	fn panicking_listener_does_not_skip_later_listeners() {
		let channel = Channel::new("test");
		let hits = Arc::new(AtomicUsize::new(0));
		channel.subscribe(|| panic!("listener failed"));
		let counter = Arc::clone(&hits);
		channel.subscribe(move || {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		assert_eq!(channel.fire(), 2);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert_eq!(channel.len(), 2);
	}
}
