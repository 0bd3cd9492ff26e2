//! Task placement for contributions and round resolvers.
//!
//! Barriers may be triggered from plain threads, so work lands on the ambient
//! tokio runtime when there is one and on a small shared runtime otherwise.
//! Every task runs inside a span naming its barrier and what it works for.

use std::any::Any;
use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::registry::ProducerId;

const FALLBACK_THREAD_NAME: &str = "cropwall-barrier";

fn fallback_runtime() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		tracing::debug!(thread = FALLBACK_THREAD_NAME, "barrier.runtime.fallback");
		Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name(FALLBACK_THREAD_NAME)
			.build()
			.unwrap_or_else(|err| panic!("cannot start fallback runtime for barrier tasks: {err}"))
	})
}

fn placement() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback_runtime().handle().clone())
}

/// Starts a producer's operation for the round being collected.
pub(crate) fn spawn_contribution<F>(barrier: &str, producer: ProducerId, operation: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let span = tracing::trace_span!("barrier.contribution", barrier, producer = %producer);
	placement().spawn(operation.instrument(span))
}

/// Starts the task that awaits a claimed round and settles it.
pub(crate) fn spawn_resolver<F>(barrier: &str, round: u64, resolve: F) -> JoinHandle<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	let span = tracing::trace_span!("barrier.resolver", barrier, round);
	placement().spawn(resolve.instrument(span))
}

/// Renders a panic payload for error reports.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Reason a contribution task ended without output.
pub(crate) fn join_error_message(err: JoinError) -> String {
	match err.try_into_panic() {
		Ok(payload) => panic_message(payload.as_ref()),
		Err(err) => err.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_str_and_string_payloads() {
		let borrowed: Box<dyn Any + Send> = Box::new("setup failed");
		let owned: Box<dyn Any + Send> = Box::new(String::from("tile 3 missing"));
		let other: Box<dyn Any + Send> = Box::new(17_u8);
		assert_eq!(panic_message(borrowed.as_ref()), "setup failed");
		assert_eq!(panic_message(owned.as_ref()), "tile 3 missing");
		assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
	}

	#[tokio::test]
	async fn reports_panicking_contribution() {
		let handle = spawn_contribution("walls", ProducerId::new(2), async { panic!("{}", String::from("crop out of bounds")) });
		let err = handle.await.unwrap_err();
		assert_eq!(join_error_message(err), "crop out of bounds");
	}

	#[tokio::test]
	async fn reports_aborted_contribution() {
		let handle = spawn_contribution("walls", ProducerId::new(1), std::future::pending::<()>());
		handle.abort();
		let err = handle.await.unwrap_err();
		assert!(err.is_cancelled());
		assert!(join_error_message(err).contains("cancelled"));
	}

	#[test]
	fn resolvers_start_outside_a_runtime() {
		let (tx, rx) = std::sync::mpsc::channel();
		spawn_resolver("walls", 4, async move {
			tx.send(Handle::current().metrics().num_workers()).unwrap();
		});
		let workers = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
		assert_eq!(workers, 2);
	}
}
