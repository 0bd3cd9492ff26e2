//! Manually resolved single-shot result cell.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

/// Returned when [`Deferred::resolve`] is called on a settled cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deferred result was already settled")]
pub struct AlreadySettled;

impl From<AlreadySettled> for crate::BarrierError {
	fn from(_: AlreadySettled) -> Self {
		Self::AlreadySettled
	}
}

/// Single-shot value settled from the outside and awaited by any number of tasks.
///
/// Clones share the same cell. Waiters that arrive after settlement get the
/// value immediately.
pub struct Deferred<T> {
	tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Deferred<T> {
	fn clone(&self) -> Self {
		Self { tx: Arc::clone(&self.tx) }
	}
}

impl<T> Default for Deferred<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> fmt::Debug for Deferred<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Deferred").field("settled", &self.is_settled()).finish()
	}
}

impl<T> Deferred<T> {
	/// Creates an unsettled cell.
	pub fn new() -> Self {
		let (tx, _) = watch::channel(None);
		Self { tx: Arc::new(tx) }
	}

	/// Settles the cell and wakes every waiter.
	pub fn resolve(&self, value: T) -> Result<(), AlreadySettled> {
		let mut value = Some(value);
		let settled = self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = value.take();
			true
		});
		if settled { Ok(()) } else { Err(AlreadySettled) }
	}

	/// Returns true once [`resolve`](Self::resolve) has succeeded.
	pub fn is_settled(&self) -> bool {
		self.tx.borrow().is_some()
	}

	/// Returns true if both handles refer to the same cell.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.tx, &other.tx)
	}
}

impl<T: Clone> Deferred<T> {
	/// Returns the settled value without waiting.
	pub fn try_get(&self) -> Option<T> {
		self.tx.borrow().clone()
	}

	/// Waits until the cell is settled and returns a clone of the value.
	pub async fn wait(&self) -> T {
		let mut rx = self.tx.subscribe();
		loop {
			let current = rx.borrow_and_update().clone();
			if let Some(value) = current {
				return value;
			}
			// `self` keeps the sender alive, so the channel cannot close here.
			if rx.changed().await.is_err() {
				std::future::pending::<()>().await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn waiters_before_and_after_resolution_agree() {
		let deferred = Deferred::<Vec<u32>>::new();
		let early = {
			let deferred = deferred.clone();
			tokio::spawn(async move { deferred.wait().await })
		};
		tokio::task::yield_now().await;

		assert!(!deferred.is_settled());
		deferred.resolve(vec![4, 2]).unwrap();

		assert_eq!(early.await.unwrap(), vec![4, 2]);
		assert_eq!(deferred.wait().await, vec![4, 2]);
		assert_eq!(deferred.try_get(), Some(vec![4, 2]));
	}

	#[tokio::test]
	async fn second_resolve_is_rejected_and_keeps_first_value() {
		let deferred = Deferred::new();
		deferred.resolve(1).unwrap();
		assert_eq!(deferred.resolve(2), Err(AlreadySettled));
		assert_eq!(deferred.wait().await, 1);
	}

	#[tokio::test]
	async fn many_concurrent_waiters_observe_same_value() {
		let deferred = Deferred::<String>::new();
		let waiters: Vec<_> = (0..8)
			.map(|_| {
				let deferred = deferred.clone();
				tokio::spawn(async move { deferred.wait().await })
			})
			.collect();

		deferred.resolve("done".into()).unwrap();
		for waiter in waiters {
			let value = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
			assert_eq!(value, "done");
		}
	}

	#[tokio::test]
	async fn unsettled_wait_stays_pending() {
		let deferred = Deferred::<u8>::new();
		let waited = tokio::time::timeout(Duration::from_millis(20), deferred.wait()).await;
		assert!(waited.is_err());
		assert!(deferred.try_get().is_none());
	}

	#[test]
	fn clones_share_one_cell() {
		let a = Deferred::<u8>::new();
		let b = a.clone();
		assert!(a.ptr_eq(&b));
		assert!(!a.ptr_eq(&Deferred::new()));
		b.resolve(3).unwrap();
		assert!(a.is_settled());
	}
}
