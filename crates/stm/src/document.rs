//! Editor-facing facade tying the text model to the state machine.
//!
//! [`ProofDocument`] owns the [`SentenceCollection`] and a
//! [`StateMachine`], translates machine events into rate-limited
//! [`DocumentUpdate`]s, and exposes the command surface an editor
//! plugin drives.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vernac_coqtop::{CallError, CoqtopEvent, Prover};
use vernac_protocol::RouteId;
use vernac_sentences::scopes::ScopeFlags;
use vernac_sentences::{ChangeSummary, SentenceCollection, SymbolInformation, TextChange};

use crate::feedback::{FeedbackSync, DEFAULT_SYNC_PERIOD};
use crate::machine::{CacheDirection, DisplayOption, SentenceState, StateMachine, StateStatus, StmEvent};
use crate::CommandResult;

/// Queries the prover answers about a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
	Check,
	Locate,
	Print,
	Search,
	About,
}

impl QueryKind {
	/// Expand a bare term into the full query sentence.
	pub fn command(self, term: &str) -> String {
		let keyword = match self {
			QueryKind::Check => "Check",
			QueryKind::Locate => "Locate",
			QueryKind::Print => "Print",
			QueryKind::Search => "Search",
			QueryKind::About => "About",
		};
		let term = term.trim().trim_end_matches('.');
		format!("{keyword} {term}.")
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
	Error,
	Warning,
}

/// One squiggle.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
	pub range: Range<usize>,
	pub message: String,
	pub severity: DiagnosticSeverity,
}

/// One status-colored region of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
	pub range: Range<usize>,
	pub status: StateStatus,
}

/// Everything a client needs to repaint the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
	pub highlights: Vec<Highlight>,
	pub diagnostics: Vec<Diagnostic>,
	pub focus: usize,
}

/// A proof script under interactive interpretation.
pub struct ProofDocument<P: Prover> {
	collection: Arc<Mutex<SentenceCollection>>,
	machine: StateMachine<P>,
	sync: FeedbackSync<DocumentUpdate>,
}

impl<P: Prover + 'static> ProofDocument<P> {
	/// Build a document over a prover handle.
	///
	/// Returns the rate-limited repaint stream and the pass-through
	/// stream of events a repaint cannot express (messages, profiling
	/// results, session death).
	pub fn new(
		prover: Arc<P>,
		coq_events: mpsc::UnboundedReceiver<CoqtopEvent>,
		text: &str,
		version: i32,
	) -> (
		Self,
		mpsc::UnboundedReceiver<DocumentUpdate>,
		mpsc::UnboundedReceiver<StmEvent>,
	) {
		let (machine, stm_events) = StateMachine::new(prover, coq_events);
		let (sync, updates) = FeedbackSync::new(DEFAULT_SYNC_PERIOD);
		let (forward_tx, forward_rx) = mpsc::unbounded_channel();
		let collection = Arc::new(Mutex::new(SentenceCollection::new(text, version)));
		tokio::spawn(relay(
			stm_events,
			machine.clone(),
			collection.clone(),
			sync.clone(),
			forward_tx,
		));
		(
			Self {
				collection,
				machine,
				sync,
			},
			updates,
			forward_rx,
		)
	}

	pub async fn start(&self, script_path: Option<String>) -> Result<(), CallError> {
		self.machine.start(script_path).await
	}

	pub fn is_running(&self) -> bool {
		self.machine.is_running()
	}

	pub fn get_text(&self) -> String {
		self.collection.lock().get_text()
	}

	pub fn version(&self) -> i32 {
		self.collection.lock().version()
	}

	/// Apply an edit batch to the text model.
	///
	/// The machine is not consulted here; the next interpretation run
	/// reconciles prover state against the changed segmentation.
	pub fn apply_edits(
		&self,
		version: i32,
		changes: &[TextChange],
	) -> vernac_sentences::Result<ChangeSummary> {
		let summary = {
			let mut collection = self.collection.lock();
			let summary = collection.apply_changes(version, changes)?;
			// Segmentation must tile the document exactly.
			debug_assert_eq!(collection.sentence_text(), collection.get_text());
			summary
		};
		debug!(?version, ?summary, "edit batch applied");
		self.publish();
		Ok(summary)
	}

	pub async fn interpret_to_point(
		&self,
		offset: usize,
		synchronous: bool,
		cancel: CancellationToken,
	) -> CommandResult {
		let snapshot = self.collection.lock().clone();
		let result = self
			.machine
			.interpret_to_point(&snapshot, offset, synchronous, cancel)
			.await;
		self.publish();
		result
	}

	pub async fn interpret_to_end(
		&self,
		synchronous: bool,
		cancel: CancellationToken,
	) -> CommandResult {
		self.interpret_to_point(usize::MAX, synchronous, cancel).await
	}

	pub async fn step_forward(&self, cancel: CancellationToken) -> CommandResult {
		let snapshot = self.collection.lock().clone();
		let result = self.machine.step_forward(&snapshot, cancel).await;
		self.publish();
		result
	}

	pub async fn step_backward(&self) -> CommandResult {
		let snapshot = self.collection.lock().clone();
		let result = self.machine.step_backward(&snapshot).await;
		self.publish();
		result
	}

	/// Run a term query at the current tip; answers arrive on the
	/// pass-through event stream.
	pub async fn query(&self, kind: QueryKind, term: &str, route: RouteId) -> CommandResult {
		self.machine.query(&kind.command(term), route).await
	}

	pub async fn get_goal(&self) -> CommandResult {
		self.machine.get_goal().await
	}

	pub fn get_cached_goal(&self, offset: usize, direction: CacheDirection) -> CommandResult {
		self.machine.get_cached_goal(offset, direction)
	}

	pub async fn set_display_options(
		&self,
		options: &[(DisplayOption, bool)],
	) -> Result<(), CallError> {
		self.machine.set_display_options(options).await
	}

	pub async fn set_wrapping_width(&self, width: i64) -> Result<(), CallError> {
		self.machine.set_wrapping_width(width).await
	}

	pub async fn request_ltacprof_results(
		&self,
		offset: Option<usize>,
		route: RouteId,
	) -> CommandResult {
		self.machine.request_ltacprof_results(offset, route).await
	}

	/// Resolve `id` by walking scopes backward from the sentence at
	/// `offset`.
	pub fn lookup_symbol(
		&self,
		offset: usize,
		id: &[String],
		flags: ScopeFlags,
	) -> Vec<SymbolInformation> {
		let collection = self.collection.lock();
		let Some(from) = collection.sentence_at(offset).map(|s| s.id) else {
			return Vec::new();
		};
		collection.lookup_symbol(from, id, flags)
	}

	pub fn interrupt(&self) -> bool {
		self.machine.interrupt()
	}

	pub async fn shutdown(&self) {
		self.machine.shutdown().await;
	}

	/// Compute the repaint payload on demand, bypassing rate limiting.
	pub fn current_update(&self) -> DocumentUpdate {
		let collection = self.collection.lock();
		compute_update(&collection, &self.machine.sentence_states(), self.machine.focus())
	}

	fn publish(&self) {
		self.sync.submit(self.current_update());
	}
}

/// Consume machine events: statuses trigger a repaint, the rest pass
/// through.
async fn relay<P: Prover + 'static>(
	mut stm_events: mpsc::UnboundedReceiver<StmEvent>,
	machine: StateMachine<P>,
	collection: Arc<Mutex<SentenceCollection>>,
	sync: FeedbackSync<DocumentUpdate>,
	forward: mpsc::UnboundedSender<StmEvent>,
) {
	while let Some(event) = stm_events.recv().await {
		match event {
			StmEvent::SentenceStatus { .. }
			| StmEvent::ClearSentence { .. }
			| StmEvent::Focus { .. }
			| StmEvent::Error { .. } => {
				let update = {
					let collection = collection.lock();
					compute_update(&collection, &machine.sentence_states(), machine.focus())
				};
				sync.submit(update);
			}
			StmEvent::CoqDied { .. } => {
				let update = {
					let collection = collection.lock();
					compute_update(&collection, &machine.sentence_states(), machine.focus())
				};
				sync.submit_now(update);
				let _ = forward.send(event);
			}
			StmEvent::Message(_) | StmEvent::LtacProf(_) => {
				let _ = forward.send(event);
			}
		}
	}
}

fn compute_update(
	collection: &SentenceCollection,
	states: &[SentenceState],
	focus: usize,
) -> DocumentUpdate {
	let mut highlights = highlights(states);
	// The trailing unterminated region is still being written; show it as
	// parsing rather than leaving it unpainted.
	for sentence in collection.sentences() {
		if !sentence.complete && !sentence.text.trim().is_empty() {
			highlights.push(Highlight {
				range: sentence.range(),
				status: StateStatus::Parsing,
			});
		}
	}
	DocumentUpdate {
		highlights,
		diagnostics: diagnostics(collection, states),
		focus,
	}
}

/// Merge per-sentence statuses into contiguous same-status regions.
fn highlights(states: &[SentenceState]) -> Vec<Highlight> {
	let mut merged: Vec<Highlight> = Vec::new();
	for state in states {
		match merged.last_mut() {
			Some(last) if last.status == state.status && last.range.end == state.range.start => {
				last.range.end = state.range.end;
			}
			_ => merged.push(Highlight {
				range: state.range.clone(),
				status: state.status,
			}),
		}
	}
	merged
}

fn diagnostics(collection: &SentenceCollection, states: &[SentenceState]) -> Vec<Diagnostic> {
	let mut diagnostics: Vec<Diagnostic> = states
		.iter()
		.filter_map(|state| {
			let error = state.error.as_ref()?;
			Some(Diagnostic {
				range: error.range.clone().unwrap_or_else(|| state.range.clone()),
				message: error.message.to_plain_string(),
				severity: DiagnosticSeverity::Error,
			})
		})
		.collect();
	for sentence in collection.sentences() {
		if !sentence.complete && !sentence.text.trim().is_empty() {
			diagnostics.push(Diagnostic {
				range: sentence.range(),
				message: "unterminated command".to_owned(),
				severity: DiagnosticSeverity::Warning,
			});
		}
	}
	diagnostics.sort_by_key(|d| d.range.start);
	diagnostics
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use vernac_sentences::SentenceId;

	use super::*;
	use crate::testutil::FakeProver;

	fn state(range: Range<usize>, status: StateStatus) -> SentenceState {
		SentenceState {
			id: SentenceId(range.start as u64),
			range,
			status,
			state_id: None,
			error: None,
		}
	}

	#[test]
	fn test_query_expansion() {
		assert_eq!(QueryKind::Check.command("nat"), "Check nat.");
		assert_eq!(QueryKind::Locate.command(" plus "), "Locate plus.");
		assert_eq!(QueryKind::Print.command("le."), "Print le.");
		assert_eq!(QueryKind::Search.command("(_ + _ = _)"), "Search (_ + _ = _).");
		assert_eq!(QueryKind::About.command("eq_refl"), "About eq_refl.");
	}

	#[test]
	fn test_highlights_coalesce_adjacent_equal_statuses() {
		let states = vec![
			state(0..4, StateStatus::Processed),
			state(4..9, StateStatus::Processed),
			state(9..16, StateStatus::Error),
			// A gap breaks the run even with an equal status.
			state(20..25, StateStatus::Error),
		];
		assert_eq!(highlights(&states), vec![
			Highlight {
				range: 0..9,
				status: StateStatus::Processed,
			},
			Highlight {
				range: 9..16,
				status: StateStatus::Error,
			},
			Highlight {
				range: 20..25,
				status: StateStatus::Error,
			},
		]);
	}

	#[tokio::test]
	async fn test_edits_keep_segmentation_tiling_the_text() {
		let prover = FakeProver::new();
		let (_coq_tx, coq_rx) = mpsc::unbounded_channel();
		let (doc, _updates, _events) = ProofDocument::new(prover, coq_rx, "One. Two. Three.", 1);

		doc.apply_edits(2, &[TextChange {
			range: 5..9,
			text: "Deux.".to_owned(),
		}])
		.unwrap();
		doc.apply_edits(3, &[TextChange {
			range: 0..0,
			text: "Zero. ".to_owned(),
		}])
		.unwrap();

		let collection = doc.collection.lock();
		assert_eq!(collection.get_text(), "Zero. One. Deux. Three.");
		assert_eq!(collection.sentence_text(), collection.get_text());
	}

	#[tokio::test]
	async fn test_interpret_publishes_an_update() {
		let prover = FakeProver::new();
		let (_coq_tx, coq_rx) = mpsc::unbounded_channel();
		let (doc, mut updates, _events) =
			ProofDocument::new(prover, coq_rx, "Check nat. Check bool.", 1);
		doc.start(None).await.unwrap();

		let result = doc.interpret_to_end(true, CancellationToken::new()).await;
		assert!(matches!(result, CommandResult::ProofView { focus: 22, .. }));

		let update = updates.recv().await.unwrap();
		assert_eq!(update.focus, 22);
		assert_eq!(update.highlights, vec![Highlight {
			range: 0..22,
			status: StateStatus::Processed,
		}]);
		assert!(update.diagnostics.is_empty());
	}

	#[tokio::test]
	async fn test_failure_surfaces_a_diagnostic() {
		let prover = FakeProver::new();
		prover.fail_on("Two.");
		let (_coq_tx, coq_rx) = mpsc::unbounded_channel();
		let (doc, _updates, _events) = ProofDocument::new(prover, coq_rx, "One. Two. Three.", 1);
		doc.start(None).await.unwrap();

		let result = doc.interpret_to_end(true, CancellationToken::new()).await;
		assert!(matches!(result, CommandResult::Failure { .. }));

		let update = doc.current_update();
		assert_eq!(update.focus, 4);
		assert_eq!(update.diagnostics, vec![Diagnostic {
			range: 5..8,
			message: "Oops.".to_owned(),
			severity: DiagnosticSeverity::Error,
		}]);
	}

	#[tokio::test]
	async fn test_unterminated_tail_is_flagged() {
		let prover = FakeProver::new();
		let (_coq_tx, coq_rx) = mpsc::unbounded_channel();
		let (doc, _updates, _events) = ProofDocument::new(prover, coq_rx, "One. Tw", 1);

		let update = doc.current_update();
		assert_eq!(update.diagnostics, vec![Diagnostic {
			range: 4..7,
			message: "unterminated command".to_owned(),
			severity: DiagnosticSeverity::Warning,
		}]);
		assert_eq!(update.highlights, vec![Highlight {
			range: 4..7,
			status: StateStatus::Parsing,
		}]);
	}
}
