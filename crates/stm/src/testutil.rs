//! Scripted prover double for machine and document tests.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use vernac_coqtop::{AddResult, CallError, EditAtFocus, Prover};
use vernac_protocol::{EditId, Goal, Goals, Location, OptionValue, RouteId, StateId, Status};
use vernac_text::AnnotatedText;

pub(crate) struct FakeProver {
	log: Mutex<Vec<String>>,
	next_state: AtomicI64,
	fail_on: Mutex<Option<String>>,
	gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
	alive: AtomicBool,
}

impl FakeProver {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self {
			log: Mutex::new(Vec::new()),
			next_state: AtomicI64::new(2),
			fail_on: Mutex::new(None),
			gate: Mutex::new(None),
			alive: AtomicBool::new(true),
		})
	}

	pub(crate) fn log(&self) -> Vec<String> {
		self.log.lock().clone()
	}

	/// Make every add whose trimmed command contains `needle` fail.
	pub(crate) fn fail_on(&self, needle: &str) {
		*self.fail_on.lock() = Some(needle.to_owned());
	}

	/// Block the next add call until the returned sender fires.
	pub(crate) fn gate_next_add(&self) -> tokio::sync::oneshot::Sender<()> {
		let (tx, rx) = tokio::sync::oneshot::channel();
		*self.gate.lock() = Some(rx);
		tx
	}
}

#[async_trait]
impl Prover for FakeProver {
	async fn init(&self, _script_path: Option<String>) -> Result<StateId, CallError> {
		self.log.lock().push("init".to_owned());
		Ok(StateId(1))
	}

	async fn add(
		&self,
		command: &str,
		_edit_id: EditId,
		_state_id: StateId,
		_verbose: bool,
	) -> Result<AddResult, CallError> {
		let gate = self.gate.lock().take();
		if let Some(gate) = gate {
			let _ = gate.await;
		}
		let trimmed = command.trim().to_owned();
		self.log.lock().push(format!("add:{trimmed}"));
		let fails = self
			.fail_on
			.lock()
			.as_ref()
			.is_some_and(|needle| trimmed.contains(needle.as_str()));
		if fails {
			return Err(CallError::Failure {
				state_id: None,
				location: Some(Location { start: 1, stop: 4 }),
				message: AnnotatedText::Plain("Oops.".to_owned()),
			});
		}
		Ok(AddResult {
			state_id: StateId(self.next_state.fetch_add(1, Ordering::SeqCst)),
			unfocused_state: None,
		})
	}

	async fn edit_at(&self, state_id: StateId) -> Result<Option<EditAtFocus>, CallError> {
		self.log.lock().push(format!("edit_at:{}", state_id.0));
		Ok(None)
	}

	async fn goal(&self) -> Result<Option<Goals>, CallError> {
		self.log.lock().push("goal".to_owned());
		Ok(Some(Goals {
			foreground: vec![Goal {
				id: "1".to_owned(),
				hypotheses: Vec::new(),
				conclusion: AnnotatedText::Plain("True".to_owned()),
			}],
			background: Vec::new(),
			shelved: Vec::new(),
			abandoned: Vec::new(),
		}))
	}

	async fn status(&self, _force: bool) -> Result<Status, CallError> {
		Ok(Status {
			path: Vec::new(),
			proof_name: None,
			all_proofs: Vec::new(),
			proof_num: 0,
		})
	}

	async fn query(
		&self,
		_route: RouteId,
		text: &str,
		state_id: StateId,
	) -> Result<(), CallError> {
		self.log
			.lock()
			.push(format!("query:{}@{}", text.trim(), state_id.0));
		Ok(())
	}

	async fn set_options(&self, options: Vec<(Vec<String>, OptionValue)>) -> Result<(), CallError> {
		self.log.lock().push(format!("set_options:{}", options.len()));
		Ok(())
	}

	fn interrupt(&self) -> bool {
		true
	}

	fn is_running(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}

	async fn dispose(&self) {
		self.alive.store(false, Ordering::SeqCst);
		self.log.lock().push("dispose".to_owned());
	}
}
