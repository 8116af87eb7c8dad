//! Incremental proof-state tracking over a prover session.
//!
//! Sits between an editor front end and the prover transport: the
//! [`StateMachine`] maps accepted sentences to prover state handles and
//! replays the minimal suffix after edits, while [`ProofDocument`] adds
//! the text model, rate-limited status publishing, and diagnostics.

mod document;
mod feedback;
mod machine;
mod proofview;
#[cfg(test)]
mod testutil;

use std::ops::Range;

use vernac_text::AnnotatedText;

pub use document::{Diagnostic, DiagnosticSeverity, DocumentUpdate, Highlight, ProofDocument, QueryKind};
pub use feedback::{FeedbackSync, DEFAULT_SYNC_PERIOD};
pub use machine::{
	CacheDirection, DisplayOption, SentenceError, SentenceState, StateMachine, StateStatus,
	StmEvent,
};
pub use proofview::{Hypothesis, ProofGoal, ProofView};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
	UserRequest,
	Anomaly,
	InternalError,
}

/// Outcome of one editor-facing command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
	/// No session, or the session has died; `reason` carries the
	/// diagnostic when one is known.
	NotRunning { reason: Option<String> },
	/// Another operation holds the machine.
	Busy,
	/// The prover rejected a sentence; focus stops before it.
	Failure {
		message: AnnotatedText,
		range: Option<Range<usize>>,
		focus: usize,
	},
	/// The run completed inside a proof.
	ProofView {
		proof_view: ProofView,
		focus: usize,
	},
	/// The run was interrupted; focus covers what completed.
	Interrupted { focus: usize },
	/// The run completed outside any proof (or dispatch has merely
	/// begun, in asynchronous mode).
	NoProof { focus: usize },
}

impl CommandResult {
	/// Focus offset after the command, when the session was usable.
	pub fn focus(&self) -> Option<usize> {
		match self {
			CommandResult::NotRunning { .. } | CommandResult::Busy => None,
			CommandResult::Failure { focus, .. }
			| CommandResult::ProofView { focus, .. }
			| CommandResult::Interrupted { focus }
			| CommandResult::NoProof { focus } => Some(*focus),
		}
	}
}
