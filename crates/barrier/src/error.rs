//! Error types for barrier operations and round outcomes.

use thiserror::Error;

use crate::registry::ProducerId;

/// Errors surfaced by [`RoundBarrier`](crate::RoundBarrier) calls and rejected rounds.
///
/// Round outcomes are shared by every waiter, so this type is [`Clone`] and
/// producer failures are carried as rendered messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarrierError {
	/// The producer id is already registered.
	#[error("{0} is already registered")]
	DuplicateRegistration(ProducerId),

	/// The producer id is not registered.
	#[error("{0} is not registered")]
	NotRegistered(ProducerId),

	/// A round outcome was settled twice.
	#[error("round result was already settled")]
	AlreadySettled,

	/// The producer already holds a contribution that has not been collected yet.
	#[error("{0} already contributed to the current round")]
	DuplicateContribution(ProducerId),

	/// A producer operation returned an error.
	#[error("{producer} failed: {message}")]
	ProducerFailed {
		/// Producer whose operation failed.
		producer: ProducerId,
		/// Rendered error chain.
		message: String,
	},

	/// A producer operation panicked.
	#[error("{producer} panicked: {message}")]
	ProducerPanicked {
		/// Producer whose operation panicked.
		producer: ProducerId,
		/// Panic payload, if it was a string.
		message: String,
	},

	/// A producer task was cancelled before it contributed.
	#[error("{0} was cancelled before contributing")]
	ProducerCancelled(ProducerId),
}

impl BarrierError {
	/// Returns the producer this error is attributed to, if any.
	pub fn producer(&self) -> Option<ProducerId> {
		match self {
			Self::DuplicateRegistration(id) | Self::NotRegistered(id) | Self::DuplicateContribution(id) | Self::ProducerCancelled(id) => Some(*id),
			Self::ProducerFailed { producer, .. } | Self::ProducerPanicked { producer, .. } => Some(*producer),
			Self::AlreadySettled => None,
		}
	}

	/// Returns true when the error rejected a whole round.
	pub fn is_round_failure(&self) -> bool {
		matches!(self, Self::ProducerFailed { .. } | Self::ProducerPanicked { .. } | Self::ProducerCancelled(_))
	}
}

/// Result type for barrier operations.
pub type Result<T> = std::result::Result<T, BarrierError>;
