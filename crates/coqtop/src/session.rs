//! The IDE protocol session over an established channel pair.
//!
//! [`IdeSession`] is deliberately generic over the stream halves so the
//! protocol discipline can be exercised against in-memory duplex pipes; the
//! real TCP sockets are wired in by [`crate::CoqtopProcess`].
//!
//! Serialization discipline: the prover is a single-threaded sequential
//! oracle, so only one command call may be outstanding at a time on the
//! command channel. Concurrent callers queue on an async mutex and are
//! served in submission order. Feedback and messages are uncorrelated with
//! the in-flight call and stream out as [`CoqtopEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use vernac_protocol::{
	Call, DecodeError, EditId, Feedback, Goals, Message, OptionValue, ProtocolEvent,
	ProtocolValue, ProtocolVariant, RouteId, StateId, Status, UnionSide, ValueReturn, XmlDecoder,
};

use crate::CallError;

/// Out-of-band traffic from the prover.
#[derive(Debug, Clone)]
pub enum CoqtopEvent {
	/// Per-state status or diagnostic push.
	Feedback(Feedback),
	/// Leveled log line.
	Message(Message),
	/// The session ended. `error` is false for a requested shutdown.
	Died {
		error: bool,
		message: Option<String>,
	},
}

/// Result of a successful `Add` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResult {
	/// Handle of the newly accepted state.
	pub state_id: StateId,
	/// When closing a focused proof, the state to unfocus to.
	pub unfocused_state: Option<StateId>,
}

/// Focus information returned by `Edit_at` when rolling back into the
/// middle of a completed proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditAtFocus {
	pub state_id: StateId,
	pub qed_state_id: StateId,
	pub old_tip: StateId,
}

type PendingSlot = Arc<Mutex<Option<oneshot::Sender<Result<ValueReturn, CallError>>>>>;

/// A live protocol session on the command channel.
pub struct IdeSession {
	variant: ProtocolVariant,
	/// Queue of callers; guarantees one outstanding command at a time.
	call_lock: tokio::sync::Mutex<()>,
	writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
	pending: PendingSlot,
	dead: Arc<AtomicBool>,
	events_tx: mpsc::UnboundedSender<CoqtopEvent>,
}

impl IdeSession {
	/// Start a session over the main channel halves.
	pub fn new(
		main_r: impl AsyncRead + Send + Unpin + 'static,
		main_w: impl AsyncWrite + Send + Unpin + 'static,
		variant: ProtocolVariant,
	) -> (Arc<Self>, mpsc::UnboundedReceiver<CoqtopEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let session = Arc::new(Self {
			variant,
			call_lock: tokio::sync::Mutex::new(()),
			writer: tokio::sync::Mutex::new(Box::new(main_w)),
			pending: Arc::new(Mutex::new(None)),
			dead: Arc::new(AtomicBool::new(false)),
			events_tx,
		});
		tokio::spawn(read_loop(
			main_r,
			session.pending.clone(),
			session.dead.clone(),
			session.events_tx.clone(),
		));
		(session, events_rx)
	}

	/// Whether the session has ended.
	pub fn is_dead(&self) -> bool {
		self.dead.load(Ordering::Acquire)
	}

	/// End the session, failing any pending call.
	///
	/// Idempotent; only the first close emits a [`CoqtopEvent::Died`].
	pub fn close(&self, error: bool, message: Option<String>) {
		if self.dead.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(tx) = self.pending.lock().take() {
			let _ = tx.send(Err(CallError::Died {
				message: message.clone(),
			}));
		}
		let _ = self.events_tx.send(CoqtopEvent::Died { error, message });
	}

	/// Issue one call and await its response.
	pub async fn call(&self, call: Call) -> Result<ProtocolValue, CallError> {
		let _guard = self.call_lock.lock().await;
		if self.is_dead() {
			return Err(CallError::NotRunning);
		}
		let (tx, rx) = oneshot::channel();
		*self.pending.lock() = Some(tx);

		let frame = call.to_frame(self.variant);
		debug!(call = call.name(), "dispatching call");
		{
			let mut writer = self.writer.lock().await;
			let write = async {
				writer.write_all(frame.as_bytes()).await?;
				writer.flush().await
			};
			if let Err(err) = write.await {
				self.pending.lock().take();
				self.close(true, Some(err.to_string()));
				return Err(CallError::Died {
					message: Some(err.to_string()),
				});
			}
		}

		match rx.await {
			Ok(Ok(ValueReturn::Good(value))) => Ok(value),
			Ok(Ok(ValueReturn::Fail {
				state_id,
				location,
				message,
			})) => Err(CallError::Failure {
				state_id,
				location,
				message,
			}),
			Ok(Err(err)) => Err(err),
			Err(_) => Err(CallError::Died { message: None }),
		}
	}

	/// Initialize the prover session; returns the root state handle.
	pub async fn init(&self, script_path: Option<String>) -> Result<StateId, CallError> {
		let value = self.call(Call::Init { script_path }).await?;
		value
			.find_state_id()
			.ok_or_else(|| CallError::Decode("Init response carried no state id".into()))
	}

	/// Interpret one command on top of `state_id`.
	pub async fn add(
		&self,
		command: &str,
		edit_id: EditId,
		state_id: StateId,
		verbose: bool,
	) -> Result<AddResult, CallError> {
		let value = self
			.call(Call::Add {
				command: command.to_owned(),
				edit_id,
				state_id,
				verbose,
			})
			.await?;
		parse_add_result(value)
	}

	/// Roll back to `state_id`.
	pub async fn edit_at(&self, state_id: StateId) -> Result<Option<EditAtFocus>, CallError> {
		let value = self.call(Call::EditAt { state_id }).await?;
		Ok(parse_edit_at(value))
	}

	/// Fetch the current goal state; `None` when no proof is open.
	pub async fn goal(&self) -> Result<Option<Goals>, CallError> {
		let value = self.call(Call::Goal).await?;
		Ok(value.into_goals())
	}

	/// Fetch prover status.
	pub async fn status(&self, force: bool) -> Result<Status, CallError> {
		match self.call(Call::Status { force }).await? {
			ProtocolValue::Status(status) => Ok(status),
			other => Err(CallError::Decode(format!(
				"Status response carried {other:?}"
			))),
		}
	}

	/// Run a query; its output arrives as routed messages.
	pub async fn query(
		&self,
		route: RouteId,
		text: &str,
		state_id: StateId,
	) -> Result<(), CallError> {
		self.call(Call::Query {
			route,
			text: text.to_owned(),
			state_id,
		})
		.await?;
		Ok(())
	}

	/// Set prover options.
	pub async fn set_options(
		&self,
		options: Vec<(Vec<String>, OptionValue)>,
	) -> Result<(), CallError> {
		self.call(Call::SetOptions(options)).await?;
		Ok(())
	}

	/// Ask the prover to exit cleanly.
	pub async fn quit(&self) -> Result<(), CallError> {
		self.call(Call::Quit).await?;
		Ok(())
	}
}

fn parse_add_result(value: ProtocolValue) -> Result<AddResult, CallError> {
	let state_id = value
		.find_state_id()
		.ok_or_else(|| CallError::Decode("Add response carried no state id".into()))?;
	// (state_id, ((CSome unfocus_state | CNone), message))
	let unfocused_state = match &value {
		ProtocolValue::Pair(outer) => match &outer.1 {
			ProtocolValue::Pair(inner) => match &inner.0 {
				ProtocolValue::Union(UnionSide::Right, boxed) => boxed.find_state_id(),
				_ => None,
			},
			_ => None,
		},
		_ => None,
	};
	Ok(AddResult {
		state_id,
		unfocused_state,
	})
}

fn parse_edit_at(value: ProtocolValue) -> Option<EditAtFocus> {
	let ProtocolValue::Union(UnionSide::Right, boxed) = value else {
		return None;
	};
	let ProtocolValue::Pair(outer) = *boxed else {
		return None;
	};
	let (ProtocolValue::StateId(state_id), ProtocolValue::Pair(inner)) = *outer else {
		return None;
	};
	let (ProtocolValue::StateId(qed_state_id), ProtocolValue::StateId(old_tip)) = *inner else {
		return None;
	};
	Some(EditAtFocus {
		state_id,
		qed_state_id,
		old_tip,
	})
}

async fn read_loop(
	main_r: impl AsyncRead + Send + Unpin + 'static,
	pending: PendingSlot,
	dead: Arc<AtomicBool>,
	events_tx: mpsc::UnboundedSender<CoqtopEvent>,
) {
	let mut decoder = XmlDecoder::new(main_r);
	loop {
		match decoder.next_event().await {
			Ok(Some(ProtocolEvent::Value(value))) => {
				match pending.lock().take() {
					Some(tx) => {
						let _ = tx.send(Ok(value));
					}
					None => warn!("response value with no call awaiting it"),
				}
			}
			Ok(Some(ProtocolEvent::Feedback(feedback))) => {
				let _ = events_tx.send(CoqtopEvent::Feedback(feedback));
			}
			Ok(Some(ProtocolEvent::Message(message))) => {
				let _ = events_tx.send(CoqtopEvent::Message(message));
			}
			Ok(Some(ProtocolEvent::Other(tag, _))) => {
				debug!(tag, "ignoring unmodelled top-level frame");
			}
			Ok(None) => {
				// Clean end of stream: the process closed its end.
				if !dead.swap(true, Ordering::AcqRel) {
					if let Some(tx) = pending.lock().take() {
						let _ = tx.send(Err(CallError::Died { message: None }));
					}
					let _ = events_tx.send(CoqtopEvent::Died {
						error: true,
						message: Some("connection closed".to_owned()),
					});
				}
				return;
			}
			Err(err @ (DecodeError::Malformed { .. } | DecodeError::UnexpectedClose)) => {
				// Malformed frames fail only the call awaiting them.
				warn!(error = %err, "malformed response frame");
				decoder.reset();
				if let Some(tx) = pending.lock().take() {
					let _ = tx.send(Err(CallError::Decode(err.to_string())));
				}
			}
			Err(err) => {
				if !dead.swap(true, Ordering::AcqRel) {
					if let Some(tx) = pending.lock().take() {
						let _ = tx.send(Err(CallError::Died {
							message: Some(err.to_string()),
						}));
					}
					let _ = events_tx.send(CoqtopEvent::Died {
						error: true,
						message: Some(err.to_string()),
					});
				}
				return;
			}
		}
		if dead.load(Ordering::Acquire) {
			return;
		}
	}
}

/// The call surface the state machine drives.
///
/// Implemented by [`crate::CoqtopProcess`] for the real prover and by
/// scripted fakes in state-machine tests.
#[async_trait]
pub trait Prover: Send + Sync {
	async fn init(&self, script_path: Option<String>) -> Result<StateId, CallError>;
	async fn add(
		&self,
		command: &str,
		edit_id: EditId,
		state_id: StateId,
		verbose: bool,
	) -> Result<AddResult, CallError>;
	async fn edit_at(&self, state_id: StateId) -> Result<Option<EditAtFocus>, CallError>;
	async fn goal(&self) -> Result<Option<Goals>, CallError>;
	async fn status(&self, force: bool) -> Result<Status, CallError>;
	async fn query(&self, route: RouteId, text: &str, state_id: StateId)
	-> Result<(), CallError>;
	async fn set_options(&self, options: Vec<(Vec<String>, OptionValue)>)
	-> Result<(), CallError>;
	/// Best-effort asynchronous interrupt; true if a signal was sent.
	fn interrupt(&self) -> bool;
	fn is_running(&self) -> bool;
	/// Terminate the session; idempotent.
	async fn dispose(&self);
}
