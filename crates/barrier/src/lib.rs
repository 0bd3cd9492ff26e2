//! Dynamic fan-out/fan-in round barrier.
//!
//! A [`RoundBarrier`] lets a changing set of asynchronous producers register
//! against a named trigger. Each trigger starts a *round*: every registered
//! producer starts its operation, the barrier waits until every producer that
//! is still registered has contributed, concatenates the contributions in
//! registration order and hands the aggregate to everyone waiting on that
//! round. The next round starts immediately afterwards.
//!
//! * [`Channel`]: snapshot-on-fire broadcast signal without payload
//! * [`Deferred`]: single-shot, multi-waiter result cell
//! * [`RoundBarrier`]: register/unregister/trigger/await protocol
//!
//! ```no_run
//! # async fn demo() -> cropwall_barrier::Result<()> {
//! use cropwall_barrier::{BarrierConfig, ProducerId, RoundBarrier};
//!
//! let barrier = RoundBarrier::<u32>::new(BarrierConfig::named("export-crops"));
//! barrier.register(ProducerId::new(1), || async { Ok(vec![1]) })?;
//! barrier.register(ProducerId::new(2), || async { Ok(vec![2, 3]) })?;
//!
//! assert_eq!(barrier.trigger_and_await().await?, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod barrier;
pub mod channel;
pub mod config;
pub mod deferred;
pub mod error;
mod registry;
mod spawn;

pub use barrier::{Producer, ProducerFuture, Round, RoundBarrier};
pub use channel::{Channel, ListenerId};
pub use config::{BarrierConfig, ConfigError};
pub use deferred::{AlreadySettled, Deferred};
pub use error::{BarrierError, Result};
pub use registry::ProducerId;
