//! The state machine mapping sentences to prover state handles.
//!
//! [`StateMachine`] owns the authoritative record of which sentences the
//! prover has accepted and under which state handles. Every navigation
//! operation reduces to [`StateMachine::interpret_to_point`]: diff the
//! target prefix against the accepted record, roll back once if focus
//! lies beyond the common prefix, then replay forward strictly
//! sequentially: sentence N+1 is never dispatched before N's response,
//! because N's accepted state handle is N+1's required input.
//!
//! Status updates that arrive asynchronously (feedback from background
//! proof workers, process death) are consumed on a pump task and
//! re-emitted as [`StmEvent`]s; consumers never share mutable state with
//! the machine.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vernac_coqtop::{CallError, CoqtopEvent, Prover};
use vernac_protocol::{
	EditId, Feedback, FeedbackContent, FeedbackTarget, Goals, LtacProfResults, Message,
	OptionValue, ProtocolValue, RouteId, StateId,
};
use vernac_sentences::{Sentence, SentenceCollection, SentenceId};
use vernac_text::AnnotatedText;

use crate::proofview::ProofView;
use crate::{CommandResult, StopReason};

/// Processing status of one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStatus {
	Parsing,
	Queued,
	Processing,
	Processed,
	Error,
	Incomplete,
	Axiom,
}

/// Prover-reported error detail attached to a sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceError {
	pub message: AnnotatedText,
	/// Precise sub-range in document coordinates, when the prover gave one.
	pub range: Option<Range<usize>>,
}

/// Immutable snapshot of one tracked sentence, for external readers.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceState {
	pub id: SentenceId,
	pub range: Range<usize>,
	pub status: StateStatus,
	pub state_id: Option<StateId>,
	pub error: Option<SentenceError>,
}

/// Status traffic out of the machine.
#[derive(Debug, Clone)]
pub enum StmEvent {
	SentenceStatus {
		id: SentenceId,
		range: Range<usize>,
		status: StateStatus,
	},
	/// The sentence left the accepted record (rolled back or superseded).
	ClearSentence { id: SentenceId },
	Focus { offset: usize },
	Error {
		range: Range<usize>,
		message: AnnotatedText,
	},
	Message(Message),
	LtacProf(LtacProfResults),
	CoqDied {
		reason: StopReason,
		message: Option<String>,
	},
}

/// Which way [`StateMachine::get_cached_goal`] searches from the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirection {
	Preceding,
	Subsequent,
}

/// Printing toggles the prover understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOption {
	ImplicitArguments,
	Coercions,
	RawMatchingExpressions,
	Notations,
	AllBasicLowLevelContents,
	ExistentialVariableInstances,
	UniverseLevels,
	AllLowLevelContents,
}

impl DisplayOption {
	fn option_path(self) -> Vec<String> {
		let parts: &[&str] = match self {
			DisplayOption::ImplicitArguments => &["Printing", "Implicit"],
			DisplayOption::Coercions => &["Printing", "Coercions"],
			DisplayOption::RawMatchingExpressions => &["Printing", "Matching"],
			DisplayOption::Notations => &["Printing", "Notations"],
			DisplayOption::AllBasicLowLevelContents => &["Printing", "All"],
			DisplayOption::ExistentialVariableInstances => {
				&["Printing", "Existential", "Instances"]
			}
			DisplayOption::UniverseLevels => &["Printing", "Universes"],
			DisplayOption::AllLowLevelContents => &["Printing", "All"],
		};
		parts.iter().map(|p| (*p).to_owned()).collect()
	}
}

/// The sentence data an interpretation run needs, captured before any
/// await point.
#[derive(Debug, Clone)]
struct SentenceSnapshot {
	id: SentenceId,
	range: Range<usize>,
	text: String,
}

impl From<&Sentence> for SentenceSnapshot {
	fn from(sentence: &Sentence) -> Self {
		SentenceSnapshot {
			id: sentence.id,
			range: sentence.range(),
			text: sentence.text.clone(),
		}
	}
}

struct StmSentence {
	id: SentenceId,
	range: Range<usize>,
	text: String,
	status: StateStatus,
	state_id: Option<StateId>,
	error: Option<SentenceError>,
	goal: Option<Goals>,
}

struct Inner {
	sentences: Vec<StmSentence>,
	root_state: Option<StateId>,
	focus: usize,
	running: bool,
	stop_message: Option<String>,
	edit_counter: i64,
}

/// The per-document state machine over a prover session.
pub struct StateMachine<P: Prover> {
	prover: Arc<P>,
	inner: Arc<Mutex<Inner>>,
	/// One navigation operation at a time; a second caller gets `Busy`.
	op_lock: Arc<tokio::sync::Mutex<()>>,
	events: mpsc::UnboundedSender<StmEvent>,
}

impl<P: Prover> Clone for StateMachine<P> {
	fn clone(&self) -> Self {
		Self {
			prover: self.prover.clone(),
			inner: self.inner.clone(),
			op_lock: self.op_lock.clone(),
			events: self.events.clone(),
		}
	}
}

impl<P: Prover + 'static> StateMachine<P> {
	/// Wire a machine to a prover handle and its event stream.
	pub fn new(
		prover: Arc<P>,
		coq_events: mpsc::UnboundedReceiver<CoqtopEvent>,
	) -> (Self, mpsc::UnboundedReceiver<StmEvent>) {
		let (events, events_rx) = mpsc::unbounded_channel();
		let inner = Arc::new(Mutex::new(Inner {
			sentences: Vec::new(),
			root_state: None,
			focus: 0,
			running: false,
			stop_message: None,
			edit_counter: 0,
		}));
		tokio::spawn(pump(coq_events, inner.clone(), events.clone()));
		(
			Self {
				prover,
				inner,
				op_lock: Arc::new(tokio::sync::Mutex::new(())),
				events,
			},
			events_rx,
		)
	}

	/// Initialize the prover session and record the root state.
	pub async fn start(&self, script_path: Option<String>) -> Result<(), CallError> {
		let root = self.prover.init(script_path).await?;
		let mut inner = self.inner.lock();
		inner.root_state = Some(root);
		inner.sentences.clear();
		inner.focus = 0;
		inner.running = true;
		inner.stop_message = None;
		debug!(?root, "prover session started");
		Ok(())
	}

	pub fn is_running(&self) -> bool {
		self.inner.lock().running
	}

	/// Current focus: the end offset of the last accepted sentence.
	pub fn focus(&self) -> usize {
		self.inner.lock().focus
	}

	/// Snapshot of every tracked sentence, in document order.
	pub fn sentence_states(&self) -> Vec<SentenceState> {
		self.inner
			.lock()
			.sentences
			.iter()
			.map(|s| SentenceState {
				id: s.id,
				range: s.range.clone(),
				status: s.status,
				state_id: s.state_id,
				error: s.error.clone(),
			})
			.collect()
	}

	/// Advance or retreat the accepted region to `offset`.
	///
	/// Synchronous mode resolves the whole run (or its error) before
	/// returning, ending with a goal fetch. Asynchronous mode returns as
	/// soon as dispatch has begun; statuses converge via [`StmEvent`]s
	/// and no goal is fetched.
	pub async fn interpret_to_point(
		&self,
		collection: &SentenceCollection,
		offset: usize,
		synchronous: bool,
		cancel: CancellationToken,
	) -> CommandResult {
		let Ok(guard) = self.op_lock.clone().try_lock_owned() else {
			return CommandResult::Busy;
		};
		let prefix: Vec<SentenceSnapshot> = collection
			.sentence_prefix_at(offset)
			.into_iter()
			.filter_map(|id| collection.sentence(id))
			.take_while(|s| s.complete)
			.map(SentenceSnapshot::from)
			.collect();

		if synchronous {
			let result = run_to(self.clone(), prefix, true, cancel).await;
			drop(guard);
			result
		} else {
			let machine = self.clone();
			let focus = self.focus();
			tokio::spawn(async move {
				let _guard = guard;
				let result = run_to(machine, prefix, false, cancel).await;
				trace!(?result, "asynchronous interpretation settled");
			});
			CommandResult::NoProof { focus }
		}
	}

	/// Advance exactly one sentence past the current focus.
	pub async fn step_forward(
		&self,
		collection: &SentenceCollection,
		cancel: CancellationToken,
	) -> CommandResult {
		let focus = self.focus();
		let target = collection
			.sentences()
			.iter()
			.find(|s| s.complete && s.end() > focus)
			.map_or(focus, Sentence::end);
		self.interpret_to_point(collection, target, true, cancel).await
	}

	/// Roll back exactly one sentence. Always synchronous: there is no
	/// forward work to resume.
	pub async fn step_backward(&self, collection: &SentenceCollection) -> CommandResult {
		let target = {
			let inner = self.inner.lock();
			inner.sentences.last().map_or(0, |s| s.range.start)
		};
		self.interpret_to_point(collection, target, true, CancellationToken::new())
			.await
	}

	/// Advance to the end of the document.
	pub async fn interpret_to_end(
		&self,
		collection: &SentenceCollection,
		synchronous: bool,
		cancel: CancellationToken,
	) -> CommandResult {
		self.interpret_to_point(collection, usize::MAX, synchronous, cancel)
			.await
	}

	/// Fetch the live goal state from the prover.
	pub async fn get_goal(&self) -> CommandResult {
		let Ok(_guard) = self.op_lock.clone().try_lock_owned() else {
			return CommandResult::Busy;
		};
		let focus = self.focus();
		if !self.is_running() {
			return self.not_running();
		}
		self.fetch_goal_result(focus).await
	}

	/// Consult the goal cache around `offset` without talking to the
	/// prover.
	pub fn get_cached_goal(&self, offset: usize, direction: CacheDirection) -> CommandResult {
		let inner = self.inner.lock();
		let cached = match direction {
			CacheDirection::Preceding => inner
				.sentences
				.iter()
				.rev()
				.filter(|s| s.range.start <= offset)
				.find_map(|s| s.goal.clone()),
			CacheDirection::Subsequent => inner
				.sentences
				.iter()
				.filter(|s| s.range.end >= offset)
				.find_map(|s| s.goal.clone()),
		};
		match cached {
			Some(goals) => CommandResult::ProofView {
				proof_view: ProofView::from(goals),
				focus: inner.focus,
			},
			None => CommandResult::NotRunning { reason: None },
		}
	}

	/// Dispatch a query at the current tip; routed output arrives as
	/// [`StmEvent::Message`]s.
	pub async fn query(&self, text: &str, route: RouteId) -> CommandResult {
		self.query_at(text, route, None).await
	}

	async fn query_at(&self, text: &str, route: RouteId, state: Option<StateId>) -> CommandResult {
		let Ok(_guard) = self.op_lock.clone().try_lock_owned() else {
			return CommandResult::Busy;
		};
		let (tip, focus) = {
			let inner = self.inner.lock();
			if !inner.running {
				return CommandResult::NotRunning {
					reason: inner.stop_message.clone(),
				};
			}
			let tip = state
				.or_else(|| inner.sentences.last().and_then(|s| s.state_id))
				.or(inner.root_state);
			(tip, inner.focus)
		};
		let Some(tip) = tip else {
			return self.not_running();
		};
		match self.prover.query(route, text, tip).await {
			Ok(()) => CommandResult::NoProof { focus },
			Err(err) => self.map_call_error(err, focus),
		}
	}

	/// Toggle printing options.
	pub async fn set_display_options(
		&self,
		options: &[(DisplayOption, bool)],
	) -> Result<(), CallError> {
		let mapped = options
			.iter()
			.map(|(option, on)| (option.option_path(), OptionValue::Bool(*on)))
			.collect();
		self.prover.set_options(mapped).await
	}

	/// Set the prover's output wrapping width.
	pub async fn set_wrapping_width(&self, width: i64) -> Result<(), CallError> {
		self.prover
			.set_options(vec![(
				vec!["Printing".to_owned(), "Width".to_owned()],
				OptionValue::Int(Some(width)),
			)])
			.await
	}

	/// Ask for tactic-profiling results, scoped to the sentence at
	/// `offset` when one is given; they arrive as [`StmEvent::LtacProf`].
	pub async fn request_ltacprof_results(
		&self,
		offset: Option<usize>,
		route: RouteId,
	) -> CommandResult {
		let state = offset.and_then(|offset| {
			let inner = self.inner.lock();
			inner
				.sentences
				.iter()
				.rev()
				.find(|s| s.range.start <= offset)
				.and_then(|s| s.state_id)
		});
		self.query_at("Show Ltac Profile.", route, state).await
	}

	/// Best-effort interrupt of the in-flight command.
	pub fn interrupt(&self) -> bool {
		self.prover.interrupt()
	}

	/// Stop the session. Idempotent.
	pub async fn shutdown(&self) {
		{
			let mut inner = self.inner.lock();
			if !inner.running && inner.stop_message.is_some() {
				return;
			}
			inner.running = false;
			inner.stop_message = Some("shutdown requested".to_owned());
		}
		self.prover.dispose().await;
	}

	fn not_running(&self) -> CommandResult {
		CommandResult::NotRunning {
			reason: self.inner.lock().stop_message.clone(),
		}
	}

	async fn fetch_goal_result(&self, focus: usize) -> CommandResult {
		match self.prover.goal().await {
			Ok(Some(goals)) => {
				{
					let mut inner = self.inner.lock();
					if let Some(tip) = inner.sentences.last_mut() {
						tip.goal = Some(goals.clone());
					}
				}
				CommandResult::ProofView {
					proof_view: ProofView::from(goals),
					focus,
				}
			}
			Ok(None) => CommandResult::NoProof { focus },
			Err(err) => self.map_call_error(err, focus),
		}
	}

	fn map_call_error(&self, err: CallError, focus: usize) -> CommandResult {
		if err.is_interrupt() {
			return CommandResult::Interrupted { focus };
		}
		match err {
			CallError::Failure { message, .. } => CommandResult::Failure {
				message,
				range: None,
				focus,
			},
			CallError::Decode(detail) => CommandResult::Failure {
				message: AnnotatedText::Plain(detail),
				range: None,
				focus,
			},
			CallError::Died { message } => {
				let mut inner = self.inner.lock();
				inner.running = false;
				inner.stop_message = message.clone();
				CommandResult::NotRunning { reason: message }
			}
			CallError::NotRunning => self.not_running(),
			// CallError is non-exhaustive; surface anything unknown as a
			// plain failure rather than dropping it.
			other => CommandResult::Failure {
				message: AnnotatedText::Plain(other.to_string()),
				range: None,
				focus,
			},
		}
	}
}

/// One interpretation run: rollback once if needed, then replay forward.
async fn run_to<P: Prover + 'static>(
	machine: StateMachine<P>,
	prefix: Vec<SentenceSnapshot>,
	fetch_goal: bool,
	cancel: CancellationToken,
) -> CommandResult {
	// Diff against the accepted record: the common prefix is the longest
	// run of settled sentences whose identity and text are unchanged.
	let (keep, rollback, tip, mut focus) = {
		let inner = machine.inner.lock();
		if !inner.running {
			return CommandResult::NotRunning {
				reason: inner.stop_message.clone(),
			};
		}
		let mut keep = 0;
		while keep < inner.sentences.len() && keep < prefix.len() {
			let accepted = &inner.sentences[keep];
			let target = &prefix[keep];
			let settled = matches!(accepted.status, StateStatus::Processed | StateStatus::Axiom);
			if settled && accepted.id == target.id && accepted.text == target.text {
				keep += 1;
			} else {
				break;
			}
		}
		let rollback = inner.sentences.len() > keep;
		let tip = if keep == 0 {
			inner.root_state
		} else {
			inner.sentences[keep - 1].state_id
		};
		let focus = if keep == 0 {
			0
		} else {
			inner.sentences[keep - 1].range.end
		};
		(keep, rollback, tip, focus)
	};
	let Some(mut tip) = tip else {
		return CommandResult::NotRunning {
			reason: Some("session not initialized".to_owned()),
		};
	};

	if rollback {
		debug!(?tip, keep, "rolling back to common prefix");
		if let Err(err) = machine.prover.edit_at(tip).await {
			return machine.map_call_error(err, focus);
		}
		let dropped = {
			let mut inner = machine.inner.lock();
			inner.focus = focus;
			inner.sentences.split_off(keep)
		};
		for sentence in &dropped {
			let _ = machine.events.send(StmEvent::ClearSentence { id: sentence.id });
		}
		let _ = machine.events.send(StmEvent::Focus { offset: focus });
	}

	// Everything past the common prefix waits for replay.
	for snap in &prefix[keep..] {
		let _ = machine.events.send(StmEvent::SentenceStatus {
			id: snap.id,
			range: snap.range.clone(),
			status: StateStatus::Queued,
		});
	}

	for idx in keep..prefix.len() {
		if cancel.is_cancelled() {
			debug!(focus, "interpretation cancelled between dispatches");
			return CommandResult::Interrupted { focus };
		}
		let snap = &prefix[idx];
		let edit_id = {
			let mut inner = machine.inner.lock();
			inner.edit_counter += 1;
			EditId(inner.edit_counter)
		};
		let _ = machine.events.send(StmEvent::SentenceStatus {
			id: snap.id,
			range: snap.range.clone(),
			status: StateStatus::Processing,
		});

		match machine.prover.add(&snap.text, edit_id, tip, true).await {
			Ok(accepted) => {
				tip = accepted.state_id;
				focus = snap.range.end;
				{
					let mut inner = machine.inner.lock();
					inner.sentences.push(StmSentence {
						id: snap.id,
						range: snap.range.clone(),
						text: snap.text.clone(),
						status: StateStatus::Processed,
						state_id: Some(tip),
						error: None,
						goal: None,
					});
					inner.focus = focus;
				}
				let _ = machine.events.send(StmEvent::SentenceStatus {
					id: snap.id,
					range: snap.range.clone(),
					status: StateStatus::Processed,
				});
				let _ = machine.events.send(StmEvent::Focus { offset: focus });
			}
			Err(err) if err.is_interrupt() => {
				return CommandResult::Interrupted { focus };
			}
			Err(CallError::Failure {
				location, message, ..
			}) => {
				let range = location
					.map(|loc| snap.range.start + loc.start..snap.range.start + loc.stop)
					.filter(|r| r.end <= snap.range.end)
					.unwrap_or_else(|| snap.range.clone());
				{
					let mut inner = machine.inner.lock();
					inner.sentences.push(StmSentence {
						id: snap.id,
						range: snap.range.clone(),
						text: snap.text.clone(),
						status: StateStatus::Error,
						state_id: None,
						error: Some(SentenceError {
							message: message.clone(),
							range: Some(range.clone()),
						}),
						goal: None,
					});
				}
				let _ = machine.events.send(StmEvent::SentenceStatus {
					id: snap.id,
					range: snap.range.clone(),
					status: StateStatus::Error,
				});
				let _ = machine.events.send(StmEvent::Error {
					range: range.clone(),
					message: message.clone(),
				});
				// The remainder of the run is never dispatched.
				for rest in &prefix[idx + 1..] {
					let _ = machine.events.send(StmEvent::SentenceStatus {
						id: rest.id,
						range: rest.range.clone(),
						status: StateStatus::Incomplete,
					});
				}
				return CommandResult::Failure {
					message,
					range: Some(range),
					focus,
				};
			}
			Err(other) => return machine.map_call_error(other, focus),
		}
	}

	if fetch_goal {
		machine.fetch_goal_result(focus).await
	} else {
		CommandResult::NoProof { focus }
	}
}

async fn pump(
	mut coq_events: mpsc::UnboundedReceiver<CoqtopEvent>,
	inner: Arc<Mutex<Inner>>,
	events: mpsc::UnboundedSender<StmEvent>,
) {
	while let Some(event) = coq_events.recv().await {
		match event {
			CoqtopEvent::Feedback(feedback) => handle_feedback(feedback, &inner, &events),
			CoqtopEvent::Message(message) => {
				let _ = events.send(StmEvent::Message(message));
			}
			CoqtopEvent::Died { error, message } => {
				{
					let mut inner = inner.lock();
					inner.running = false;
					inner.stop_message = message.clone();
				}
				let reason = if error {
					StopReason::Anomaly
				} else {
					StopReason::UserRequest
				};
				let _ = events.send(StmEvent::CoqDied { reason, message });
			}
		}
	}
}

fn handle_feedback(
	feedback: Feedback,
	inner: &Arc<Mutex<Inner>>,
	events: &mpsc::UnboundedSender<StmEvent>,
) {
	let FeedbackTarget::State(state_id) = feedback.target else {
		// Edit-id feedback predates state assignment; nothing to update.
		return;
	};
	match feedback.content {
		FeedbackContent::Processed => set_status(inner, events, state_id, StateStatus::Processed, None),
		FeedbackContent::Incomplete => {
			set_status(inner, events, state_id, StateStatus::Incomplete, None);
		}
		FeedbackContent::AddedAxiom => {
			set_status(inner, events, state_id, StateStatus::Axiom, None);
		}
		FeedbackContent::ProcessingIn(_) => {
			set_status(inner, events, state_id, StateStatus::Processing, None);
		}
		FeedbackContent::ErrorMsg { location, message } => {
			let error = SentenceError {
				message: message.clone(),
				range: None,
			};
			set_status(
				inner,
				events,
				state_id,
				StateStatus::Error,
				Some((error, location, message)),
			);
		}
		FeedbackContent::Message(message) => {
			let _ = events.send(StmEvent::Message(message));
		}
		FeedbackContent::Custom { name, data } if name == "ltacprof_results" => {
			let results = data.into_iter().find_map(|value| match value {
				ProtocolValue::LtacProf(results) => Some(results),
				_ => None,
			});
			match results {
				Some(results) => {
					let _ = events.send(StmEvent::LtacProf(results));
				}
				None => warn!("ltacprof feedback without results payload"),
			}
		}
		FeedbackContent::Complete
		| FeedbackContent::FileLoaded { .. }
		| FeedbackContent::FileDependency { .. }
		| FeedbackContent::WorkerStatus { .. }
		| FeedbackContent::Custom { .. }
		| FeedbackContent::Other(_) => {}
	}
}

type ErrorDetail = (SentenceError, Option<vernac_protocol::Location>, AnnotatedText);

fn set_status(
	inner: &Arc<Mutex<Inner>>,
	events: &mpsc::UnboundedSender<StmEvent>,
	state_id: StateId,
	status: StateStatus,
	error: Option<ErrorDetail>,
) {
	let update = {
		let mut inner = inner.lock();
		let sentence = inner
			.sentences
			.iter_mut()
			.find(|s| s.state_id == Some(state_id));
		match sentence {
			Some(sentence) => {
				// An error verdict is final; later worker chatter must not
				// mask it.
				if sentence.status == StateStatus::Error && status != StateStatus::Error {
					None
				} else {
					sentence.status = status;
					let error_event = error.map(|(mut detail, location, message)| {
						let range = location
							.map(|loc| {
								sentence.range.start + loc.start..sentence.range.start + loc.stop
							})
							.filter(|r| r.end <= sentence.range.end)
							.unwrap_or_else(|| sentence.range.clone());
						detail.range = Some(range.clone());
						sentence.error = Some(detail);
						(range, message)
					});
					Some((sentence.id, sentence.range.clone(), error_event))
				}
			}
			None => {
				trace!(?state_id, ?status, "feedback for untracked state");
				None
			}
		}
	};
	if let Some((id, range, error_event)) = update {
		let _ = events.send(StmEvent::SentenceStatus { id, range, status });
		if let Some((range, message)) = error_event {
			let _ = events.send(StmEvent::Error { range, message });
		}
	}
}
