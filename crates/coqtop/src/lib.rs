//! Prover process supervision and the framed duplex RPC client.
//!
//! The prover (`coqtop`/`coqidetop`) accepts commands strictly sequentially
//! over a pair of TCP channels it connects back to: a main channel carrying
//! `<call>`/`<value>` traffic plus asynchronous feedback, and a control
//! channel reserved for out-of-band signalling. This crate owns the whole
//! lifecycle:
//!
//! - [`detect_version`] probes the installed release so call syntax can be
//!   selected once per session;
//! - [`CoqtopProcess`] binds the listening endpoints *before* spawning the
//!   process (the process connects immediately on startup), spawns it with
//!   the endpoint addresses as arguments, and supervises it;
//! - [`IdeSession`] serializes calls over the main channel, one
//!   outstanding command at a time, and forwards feedback and messages as
//!   [`CoqtopEvent`]s;
//! - [`Prover`] is the seam the state machine consumes, implemented by the
//!   real client here and by scripted fakes in tests.
//!
//! Interrupts are delivered as a process signal, not a frame: the command
//! channel is blocked while a long command executes and cannot be
//! preempted in-band.

mod config;
mod process;
mod session;
mod version;

use vernac_protocol::{Location, StateId};
use vernac_text::AnnotatedText;

pub use config::CoqtopConfig;
pub use process::{CoqtopProcess, ProverCommand};
pub use session::{AddResult, CoqtopEvent, EditAtFocus, IdeSession, Prover};
pub use version::{FALLBACK_VERSION, detect_version};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The prover binary does not exist or is not executable.
	#[error("cannot find prover binary `{binary}`")]
	BinaryMissing {
		/// The binary that was looked up.
		binary: String,
	},
	/// The spawn failed for another OS-level reason.
	#[error("failed to spawn `{binary}`: {source}")]
	Spawn {
		/// The binary that was spawned.
		binary: String,
		/// Underlying OS error.
		source: std::io::Error,
	},
	/// The process never connected back to the listening endpoints.
	#[error("prover did not connect within the handshake window")]
	HandshakeTimeout,
	/// Input/output error on the channel sockets.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// The session is already disposed.
	#[error("the prover is not running")]
	NotRunning,
}

/// Failure of a single call on the command channel.
///
/// Scoped to that call: the session stays usable unless the process died.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
	/// The prover reported failure, with an optional precise sub-range
	/// within the offending sentence.
	#[error("{}", message.to_plain_string())]
	Failure {
		state_id: Option<StateId>,
		location: Option<Location>,
		message: AnnotatedText,
	},
	/// The response frame could not be decoded; only this call fails.
	#[error("malformed response frame: {0}")]
	Decode(String),
	/// The process died before the response arrived.
	#[error("prover process died{}", match message { Some(m) => format!(": {m}"), None => String::new() })]
	Died {
		message: Option<String>,
	},
	/// No session is running.
	#[error("the prover is not running")]
	NotRunning,
}

impl CallError {
	/// Whether this failure is the prover acknowledging an interrupt.
	///
	/// An interrupted command is a valid terminal outcome, distinct from
	/// success and from genuine failure.
	pub fn is_interrupt(&self) -> bool {
		match self {
			CallError::Failure { message, .. } => {
				message.to_plain_string().contains("User interrupt")
			}
			_ => false,
		}
	}
}
