//! Round barrier orchestration.
//!
//! # Round lifecycle
//!
//! 1. `Collecting`: [`RoundBarrier::trigger`] fires the channel, each listener
//!    starts its producer's operation as a task and posts it to the registry.
//! 2. After every post (and every unregister, and at the end of every trigger)
//!    the barrier checks whether each currently registered producer holds a
//!    pending contribution. An untriggered round never completes.
//! 3. `Resolving`: pending tasks are claimed in registration order and awaited
//!    on a resolver task. Producers that fire again while claimed are rejected.
//! 4. Close: claimed slots return to idle, a fresh round is installed, then the
//!    finished round is settled with the concatenation or the first failure.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::config::BarrierConfig;
use crate::deferred::{AlreadySettled, Deferred};
use crate::error::{BarrierError, Result};
use crate::registry::{ContributionTask, ProducerId, ProducerRegistry, Slot};
use crate::spawn;


/// Boxed future returned by [`Producer::produce`].
pub type ProducerFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<T>>> + Send + 'static>>;

/// Asynchronous contributor to barrier rounds.
///
/// `produce` is called synchronously while the trigger fires; only the
/// returned future runs asynchronously.
pub trait Producer<T>: Send + Sync + 'static {
	/// Starts this producer's work for one round.
	fn produce(&self) -> ProducerFuture<T>;
}

impl<T, F, Fut> Producer<T> for F
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
	fn produce(&self) -> ProducerFuture<T> {
		Box::pin(self())
	}
}

/// Handle to one round's outcome.
///
/// Holding a handle keeps the outcome reachable after the barrier has moved on,
/// so waiting on a finished round returns immediately.
pub struct Round<T> {
	seq: u64,
	outcome: Deferred<Result<Vec<T>>>,
}

impl<T> Clone for Round<T> {
	fn clone(&self) -> Self {
		Self {
			seq: self.seq,
			outcome: self.outcome.clone(),
		}
	}
}

impl<T> fmt::Debug for Round<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Round").field("seq", &self.seq).field("settled", &self.is_settled()).finish()
	}
}

impl<T> Round<T> {
	fn new(seq: u64) -> Self {
		Self {
			seq,
			outcome: Deferred::new(),
		}
	}

	/// Sequence number, starting at 0 for the first round of a barrier.
	pub fn seq(&self) -> u64 {
		self.seq
	}

	/// Returns true once the round has resolved or failed.
	pub fn is_settled(&self) -> bool {
		self.outcome.is_settled()
	}

	fn settle(&self, outcome: Result<Vec<T>>) -> std::result::Result<(), AlreadySettled> {
		self.outcome.resolve(outcome)
	}
}

impl<T: Clone> Round<T> {
	/// Waits for the round and returns its concatenated contributions.
	pub async fn wait(&self) -> Result<Vec<T>> {
		self.outcome.wait().await
	}

	/// Returns the outcome if the round has already settled.
	pub fn try_outcome(&self) -> Option<Result<Vec<T>>> {
		self.outcome.try_get()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Collecting,
	Resolving,
}

struct State<T> {
	registry: ProducerRegistry<T>,
	phase: Phase,
	round: Round<T>,
	/// The collecting round was triggered.
	armed: bool,
	/// A trigger arrived while resolving; arms the next round.
	rearm: bool,
	next_auto_id: u64,
}

struct Shared<T> {
	config: BarrierConfig,
	channel: Channel,
	state: Mutex<State<T>>,
}

/// Fan-out/fan-in barrier over a dynamic set of producers.
///
/// Clones share the same barrier. Producer and resolver tasks are spawned on
/// the caller's Tokio runtime, or on a shared background runtime outside one.
pub struct RoundBarrier<T> {
	shared: Arc<Shared<T>>,
}

impl<T> Clone for RoundBarrier<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T> fmt::Debug for RoundBarrier<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("RoundBarrier")
			.field("name", &self.shared.config.name)
			.field("producers", &state.registry.len())
			.field("round", &state.round.seq)
			.field("phase", &state.phase)
			.finish()
	}
}

impl<T> Default for RoundBarrier<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new(BarrierConfig::default())
	}
}

impl<T> RoundBarrier<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Creates a barrier with no producers, collecting round 0.
	pub fn new(config: BarrierConfig) -> Self {
		let channel = Channel::new(config.name.as_str());
		Self {
			shared: Arc::new(Shared {
				config,
				channel,
				state: Mutex::new(State {
					registry: ProducerRegistry::new(),
					phase: Phase::Collecting,
					round: Round::new(0),
					armed: false,
					rearm: false,
					next_auto_id: 0,
				}),
			}),
		}
	}

	/// Returns the barrier configuration.
	pub fn config(&self) -> &BarrierConfig {
		&self.shared.config
	}

	/// Returns the trigger channel name.
	pub fn name(&self) -> &str {
		self.shared.channel.name()
	}

	/// Registers an async closure as a producer.
	///
	/// # Errors
	///
	/// Returns [`BarrierError::DuplicateRegistration`] if `id` is already
	/// registered; the barrier is left unchanged.
	pub fn register<F, Fut>(&self, id: ProducerId, operation: F) -> Result<()>
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
	{
		self.register_producer(id, Arc::new(operation))
	}

	/// Registers a producer object.
	///
	/// # Errors
	///
	/// Returns [`BarrierError::DuplicateRegistration`] if `id` is already
	/// registered; the barrier is left unchanged.
	pub fn register_producer(&self, id: ProducerId, producer: Arc<dyn Producer<T>>) -> Result<()> {
		let shared = &self.shared;
		let mut state = shared.state.lock();
		if state.registry.contains(id) {
			tracing::debug!(barrier = %shared.config.name, producer = %id, "barrier.register.duplicate");
			return Err(BarrierError::DuplicateRegistration(id));
		}

		let weak = Arc::downgrade(shared);
		let listener = shared.channel.subscribe(move || {
			if let Some(shared) = weak.upgrade() {
				shared.contribute(id);
			}
		});
		if let Err(err) = state.registry.insert(id, producer, listener) {
			shared.channel.unsubscribe(listener);
			return Err(err);
		}

		tracing::debug!(
			barrier = %shared.config.name,
			producer = %id,
			producers = state.registry.len(),
			round = state.round.seq,
			"barrier.register"
		);
		Ok(())
	}

	/// Removes a producer and detaches its listener.
	///
	/// A contribution still pending for the collecting round is dropped from
	/// that round, which may complete without it.
	///
	/// # Errors
	///
	/// Returns [`BarrierError::NotRegistered`] if `id` is not registered.
	pub fn unregister(&self, id: ProducerId) -> Result<()> {
		let shared = &self.shared;
		let entry = {
			let mut state = shared.state.lock();
			let entry = state.registry.remove(id)?;
			shared.channel.unsubscribe(entry.listener);
			tracing::debug!(
				barrier = %shared.config.name,
				producer = %id,
				producers = state.registry.len(),
				round = state.round.seq,
				"barrier.unregister"
			);
			entry
		};

		if let Slot::Pending(task) = entry.slot
			&& shared.config.abort_unregistered
		{
			task.abort();
		}

		shared.poll_completion();
		Ok(())
	}

	/// Returns an id that is not currently registered.
	pub fn next_producer_id(&self) -> ProducerId {
		let mut state = self.shared.state.lock();
		let after_max = state.registry.max_id().and_then(|id| id.get().checked_add(1));
		let mut next = after_max.map_or(state.next_auto_id, |after_max| after_max.max(state.next_auto_id));
		// The registry holds far fewer than 2^64 entries, so this terminates.
		while state.registry.contains(ProducerId::new(next)) {
			next = next.wrapping_add(1);
		}
		state.next_auto_id = next.wrapping_add(1);
		ProducerId::new(next)
	}

	/// Signals every registered producer to contribute to the collecting round.
	pub fn trigger(&self) {
		let shared = &self.shared;
		let round = {
			let mut state = shared.state.lock();
			match state.phase {
				Phase::Collecting => state.armed = true,
				Phase::Resolving => state.rearm = true,
			}
			state.round.seq
		};

		let fired = shared.channel.fire();
		tracing::trace!(barrier = %shared.config.name, round, listeners = fired, "barrier.trigger");
		shared.poll_completion();
	}

	/// Returns a handle to the round that the next completion will settle.
	pub fn current_round(&self) -> Round<T> {
		self.shared.state.lock().round.clone()
	}

	/// Waits for the round that is current at the time of the call, whatever
	/// triggers it.
	///
	/// The round is captured eagerly: a future obtained before a round resolves
	/// still yields that round's outcome when polled afterwards.
	pub fn await_round(&self) -> impl Future<Output = Result<Vec<T>>> + Send + 'static {
		let round = self.current_round();
		async move { round.wait().await }
	}

	/// Captures the current round, triggers, and returns a future for the
	/// captured round. The trigger happens at the call, not on first poll.
	pub fn trigger_and_await(&self) -> impl Future<Output = Result<Vec<T>>> + Send + 'static {
		let round = self.current_round();
		self.trigger();
		async move { round.wait().await }
	}

	/// Returns the number of registered producers.
	pub fn len(&self) -> usize {
		self.shared.state.lock().registry.len()
	}

	/// Returns `true` if no producer is registered.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns `true` if `id` is registered.
	pub fn contains(&self, id: ProducerId) -> bool {
		self.shared.state.lock().registry.contains(id)
	}

	/// Registered producers in registration order.
	pub fn producers(&self) -> Vec<ProducerId> {
		self.shared.state.lock().registry.ids()
	}

	/// Returns `true` while a completed round is awaiting its contributions.
	pub fn is_resolving(&self) -> bool {
		self.shared.state.lock().phase == Phase::Resolving
	}

	/// Sequence number of the collecting round.
	pub fn round_seq(&self) -> u64 {
		self.shared.state.lock().round.seq
	}
}

impl<T> Shared<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Listener body: starts the producer's operation and posts its task.
	fn contribute(self: &Arc<Self>, id: ProducerId) {
		let contributor = self.state.lock().registry.contributor(id);
		let producer = match contributor {
			Ok(producer) => producer,
			Err(BarrierError::NotRegistered(_)) => {
				tracing::trace!(barrier = %self.config.name, producer = %id, "barrier.contribute.unregistered");
				return;
			}
			Err(err) => {
				tracing::warn!(barrier = %self.config.name, producer = %id, error = %err, "barrier.contribute.rejected");
				return;
			}
		};

		// Called without the lock: operations may re-enter the barrier.
		let operation: ProducerFuture<T> = match panic::catch_unwind(AssertUnwindSafe(|| producer.produce())) {
			Ok(operation) => operation,
			Err(payload) => {
				tracing::warn!(
					barrier = %self.config.name,
					producer = %id,
					panic = %spawn::panic_message(payload.as_ref()),
					"barrier.contribute.panicked"
				);
				Box::pin(resume_panic(payload))
			}
		};
		let task = spawn::spawn_contribution(&self.config.name, id, operation);

		let posted = self.state.lock().registry.post(id, task);
		match posted {
			Ok(()) => tracing::trace!(barrier = %self.config.name, producer = %id, "barrier.contribute.posted"),
			Err(err) => tracing::debug!(barrier = %self.config.name, producer = %id, error = %err, "barrier.contribute.dropped"),
		}
		self.poll_completion();
	}

	/// Claims the collecting round if every registered producer has posted.
	fn poll_completion(self: &Arc<Self>) {
		let (round, claimed) = {
			let mut state = self.state.lock();
			if state.phase != Phase::Collecting {
				return;
			}
			let armed = state.armed || state.registry.any_pending();
			if !armed || !state.registry.all_pending() {
				return;
			}
			state.phase = Phase::Resolving;
			(state.round.clone(), state.registry.claim_all())
		};

		tracing::debug!(
			barrier = %self.config.name,
			round = round.seq,
			contributors = claimed.len(),
			"barrier.round.complete"
		);

		if claimed.is_empty() {
			self.close_round(&round, Ok(Vec::new()));
			return;
		}

		let shared = Arc::clone(self);
		let abort_rest = self.config.abort_on_failure;
		spawn::spawn_resolver(&self.config.name, round.seq, async move {
			let outcome = collect(claimed, abort_rest).await;
			shared.close_round(&round, outcome);
		});
	}

	/// Installs the next round, then settles `round`.
	fn close_round(self: &Arc<Self>, round: &Round<T>, outcome: Result<Vec<T>>) {
		{
			let mut state = self.state.lock();
			state.registry.release_claimed();
			state.round = Round::new(round.seq.wrapping_add(1));
			let rearm = std::mem::take(&mut state.rearm);
			state.armed = rearm;
			state.phase = Phase::Collecting;
		}

		match &outcome {
			Ok(items) => tracing::debug!(barrier = %self.config.name, round = round.seq, items = items.len(), "barrier.round.resolved"),
			Err(err) => tracing::warn!(barrier = %self.config.name, round = round.seq, error = %err, "barrier.round.failed"),
		}
		if let Err(err) = round.settle(outcome) {
			tracing::error!(barrier = %self.config.name, round = round.seq, error = %BarrierError::from(err), "barrier.round.settle");
		}

		// Contributions posted while resolving belong to the new round.
		self.poll_completion();
	}
}

/// Contribution whose synchronous `produce` call panicked; fails its task
/// with the original payload so the round reports it like any other panic.
async fn resume_panic<T>(payload: Box<dyn Any + Send>) -> anyhow::Result<Vec<T>> {
	panic::resume_unwind(payload)
}

/// Awaits claimed contributions in registration order.
///
/// Tasks already run concurrently; the first failure in order rejects the round.
async fn collect<T>(claimed: Vec<(ProducerId, ContributionTask<T>)>, abort_rest: bool) -> Result<Vec<T>> {
	let mut items = Vec::new();
	let mut tasks = claimed.into_iter();
	while let Some((producer, task)) = tasks.next() {
		let err = match task.await {
			Ok(Ok(contribution)) => {
				items.extend(contribution);
				continue;
			}
			Ok(Err(err)) => BarrierError::ProducerFailed {
				producer,
				message: format!("{err:#}"),
			},
			Err(err) if err.is_cancelled() => BarrierError::ProducerCancelled(producer),
			Err(err) => BarrierError::ProducerPanicked {
				producer,
				message: spawn::join_error_message(err),
			},
		};
		if abort_rest {
			for (_, task) in tasks {
				task.abort();
			}
		}
		return Err(err);
	}
	Ok(items)
}
