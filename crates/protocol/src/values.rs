//! Typed protocol values and the per-tag conversion from generic elements.
//!
//! The decoder accumulates each element as a generic [`Element`] (tag name,
//! attributes, character data, already-converted children) and converts it
//! bottom-up into a [`ProtocolValue`] the moment its close tag is seen, so a
//! completed top-level element is always fully typed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vernac_text::AnnotatedText;

use crate::{DecodeError, Result};

/// Opaque handle naming a prover-internal checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub i64);

/// Identifier the editor attaches to an `Add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditId(pub i64);

/// Logical sub-stream id distinguishing query output channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteId(pub i64);

impl fmt::Display for StateId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A character range within the sentence a response refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
	/// Start offset, counted in characters from the sentence start.
	pub start: usize,
	/// End offset (exclusive).
	pub stop: usize,
}

/// Severity of a prover log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
	Debug,
	Info,
	Notice,
	Warning,
	Error,
}

/// A leveled log line, optionally tied to a location within a sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub level: MessageLevel,
	pub location: Option<Location>,
	pub text: AnnotatedText,
}

/// A single goal: identifier, hypotheses, conclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
	pub id: String,
	pub hypotheses: Vec<AnnotatedText>,
	pub conclusion: AnnotatedText,
}

/// The full goal state of a proof.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goals {
	/// Goals in focus, in order.
	pub foreground: Vec<Goal>,
	/// Unfocused goal stack: `(before, after)` pairs, innermost first.
	pub background: Vec<(Vec<Goal>, Vec<Goal>)>,
	pub shelved: Vec<Goal>,
	pub abandoned: Vec<Goal>,
}

/// Result of a `Status` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
	/// Module path of the current proof.
	pub path: Vec<String>,
	/// Name of the current proof, if any.
	pub proof_name: Option<String>,
	/// All pending proofs.
	pub all_proofs: Vec<String>,
	/// Index of the current proof.
	pub proof_num: i64,
}

/// Per-tactic profiling statistics, recursive over sub-tactics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtacProfTactic {
	pub name: String,
	pub total: f64,
	pub local: f64,
	pub num_calls: i64,
	pub max_total: f64,
	pub tactics: Vec<LtacProfTactic>,
}

/// Results of a tactic-profiling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LtacProfResults {
	pub total_time: f64,
	pub tactics: Vec<LtacProfTactic>,
}

/// What a feedback item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackTarget {
	State(StateId),
	Edit(EditId),
}

/// Asynchronous per-state status push from the prover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedbackContent {
	Processed,
	Incomplete,
	Complete,
	/// The sentence is being processed by the named worker.
	ProcessingIn(String),
	ErrorMsg {
		location: Option<Location>,
		message: AnnotatedText,
	},
	AddedAxiom,
	Message(Message),
	FileLoaded {
		module: String,
		file: String,
	},
	FileDependency {
		source: Option<String>,
		dependency: String,
	},
	WorkerStatus {
		id: String,
		status: String,
	},
	/// Extensible feedback; tactic profiling arrives as
	/// `custom` with name `ltacprof_results`.
	Custom {
		name: String,
		data: Vec<ProtocolValue>,
	},
	Other(String),
}

/// One `<feedback>` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
	pub target: FeedbackTarget,
	pub route: RouteId,
	pub content: FeedbackContent,
}

/// Which side of a union value is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnionSide {
	Left,
	Right,
}

/// Success or failure wrapper of a `<value>` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueReturn {
	Good(ProtocolValue),
	Fail {
		state_id: Option<StateId>,
		location: Option<Location>,
		message: AnnotatedText,
	},
}

/// A decoded protocol value.
///
/// Structural tags (`pair`, `list`, `option`, `union`, the scalar tags)
/// decode to generic variants; domain tags decode to their typed payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolValue {
	Unit,
	Bool(bool),
	Int(i64),
	Str(String),
	StateId(StateId),
	EditId(EditId),
	RouteId(RouteId),
	Pair(Box<(ProtocolValue, ProtocolValue)>),
	List(Vec<ProtocolValue>),
	Optional(Option<Box<ProtocolValue>>),
	Union(UnionSide, Box<ProtocolValue>),
	Richpp(AnnotatedText),
	Loc(Location),
	Level(MessageLevel),
	Message(Message),
	Feedback(Feedback),
	Goal(Goal),
	Goals(Goals),
	Status(Status),
	LtacProf(LtacProfResults),
	LtacProfTactic(LtacProfTactic),
	/// A tag this decoder does not model; carried through verbatim so a
	/// caller can at least log it.
	Unknown(String),
}

impl ProtocolValue {
	/// Extract the rich text carried by this value, treating plain strings
	/// as unannotated text.
	pub fn into_text(self) -> Option<AnnotatedText> {
		match self {
			ProtocolValue::Richpp(t) => Some(t),
			ProtocolValue::Str(s) => Some(AnnotatedText::Plain(s)),
			_ => None,
		}
	}

	/// Extract a state handle, looking through `pair` nesting on the left.
	///
	/// The `Add` response wraps the new handle as
	/// `(state_id, (union, string))`.
	pub fn find_state_id(&self) -> Option<StateId> {
		match self {
			ProtocolValue::StateId(id) => Some(*id),
			ProtocolValue::Pair(p) => p.0.find_state_id().or_else(|| p.1.find_state_id()),
			ProtocolValue::Union(_, v) => v.find_state_id(),
			ProtocolValue::Optional(Some(v)) => v.find_state_id(),
			_ => None,
		}
	}

	/// Extract the optional goal state of a `Goal` response.
	pub fn into_goals(self) -> Option<Goals> {
		match self {
			ProtocolValue::Goals(g) => Some(g),
			ProtocolValue::Optional(Some(v)) => v.into_goals(),
			_ => None,
		}
	}
}

/// One completed top-level protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
	Value(ValueReturn),
	Feedback(Feedback),
	Message(Message),
	Other(String, ProtocolValue),
}

/// A generic element accumulated by the decoder: tag name, attributes,
/// character data, and already-converted element children in order.
#[derive(Debug, Default)]
pub(crate) struct Element {
	pub name: String,
	pub attrs: BTreeMap<String, String>,
	pub text: String,
	pub children: Vec<ProtocolValue>,
}

impl Element {
	fn attr(&self, name: &str) -> Option<&str> {
		self.attrs.get(name).map(String::as_str)
	}

	fn required_attr(&self, name: &str) -> Result<&str> {
		self.attr(name)
			.ok_or_else(|| DecodeError::malformed(&self.name, format!("missing `{name}` attribute")))
	}

	fn attr_int(&self, name: &str) -> Result<Option<i64>> {
		match self.attr(name) {
			None => Ok(None),
			Some(raw) => raw
				.parse()
				.map(Some)
				.map_err(|_| DecodeError::malformed(&self.name, format!("non-numeric `{name}` attribute"))),
		}
	}

	fn child(&mut self, idx: usize) -> Result<ProtocolValue> {
		if idx < self.children.len() {
			Ok(std::mem::replace(&mut self.children[idx], ProtocolValue::Unit))
		} else {
			Err(DecodeError::malformed(
				&self.name,
				format!("expected at least {} children, found {}", idx + 1, self.children.len()),
			))
		}
	}

	fn text_child(&mut self, idx: usize) -> Result<AnnotatedText> {
		let child = self.child(idx)?;
		child
			.into_text()
			.ok_or_else(|| DecodeError::malformed(&self.name, "expected text content"))
	}

	fn string_child(&mut self, idx: usize) -> Result<String> {
		Ok(self.text_child(idx)?.to_plain_string())
	}

	fn list_child(&mut self, idx: usize) -> Result<Vec<ProtocolValue>> {
		match self.child(idx)? {
			ProtocolValue::List(items) => Ok(items),
			other => Err(DecodeError::malformed(
				&self.name,
				format!("expected list child, found {other:?}"),
			)),
		}
	}

	/// The message body: a `richpp` child when present, the trailing string
	/// child otherwise, falling back to raw character data.
	fn message_body(&mut self) -> AnnotatedText {
		let body = self.children.iter().rposition(|c| {
			matches!(c, ProtocolValue::Richpp(_) | ProtocolValue::Str(_))
		});
		match body {
			Some(idx) => self
				.child(idx)
				.ok()
				.and_then(ProtocolValue::into_text)
				.unwrap_or_default(),
			None => AnnotatedText::Plain(std::mem::take(&mut self.text)),
		}
	}
}

fn goal_list(values: Vec<ProtocolValue>, tag: &str) -> Result<Vec<Goal>> {
	values
		.into_iter()
		.map(|v| match v {
			ProtocolValue::Goal(g) => Ok(g),
			other => Err(DecodeError::malformed(tag, format!("expected goal, found {other:?}"))),
		})
		.collect()
}

fn string_list(values: Vec<ProtocolValue>, tag: &str) -> Result<Vec<String>> {
	values
		.into_iter()
		.map(|v| match v {
			ProtocolValue::Str(s) => Ok(s),
			other => Err(DecodeError::malformed(tag, format!("expected string, found {other:?}"))),
		})
		.collect()
}

fn convert_goal(mut el: Element) -> Result<ProtocolValue> {
	let id = match el.child(0)? {
		ProtocolValue::Str(s) => s,
		ProtocolValue::Int(n) => n.to_string(),
		other => {
			return Err(DecodeError::malformed("goal", format!("bad goal id: {other:?}")));
		}
	};
	let hypotheses = el
		.list_child(1)?
		.into_iter()
		.map(|v| {
			v.into_text()
				.ok_or_else(|| DecodeError::malformed("goal", "hypothesis is not text"))
		})
		.collect::<Result<Vec<_>>>()?;
	let conclusion = el.text_child(2)?;
	Ok(ProtocolValue::Goal(Goal {
		id,
		hypotheses,
		conclusion,
	}))
}

fn convert_goals(mut el: Element) -> Result<ProtocolValue> {
	let foreground = goal_list(el.list_child(0)?, "goals")?;
	let mut goals = Goals {
		foreground,
		..Goals::default()
	};
	if el.children.len() > 1 {
		for entry in el.list_child(1)? {
			let ProtocolValue::Pair(pair) = entry else {
				return Err(DecodeError::malformed("goals", "background entry is not a pair"));
			};
			let (before, after) = *pair;
			let (ProtocolValue::List(before), ProtocolValue::List(after)) = (before, after) else {
				return Err(DecodeError::malformed("goals", "background pair is not two lists"));
			};
			goals
				.background
				.push((goal_list(before, "goals")?, goal_list(after, "goals")?));
		}
	}
	if el.children.len() > 2 {
		goals.shelved = goal_list(el.list_child(2)?, "goals")?;
	}
	if el.children.len() > 3 {
		goals.abandoned = goal_list(el.list_child(3)?, "goals")?;
	}
	Ok(ProtocolValue::Goals(goals))
}

fn convert_status(mut el: Element) -> Result<ProtocolValue> {
	let path = string_list(el.list_child(0)?, "status")?;
	let proof_name = match el.child(1)? {
		ProtocolValue::Optional(opt) => match opt.map(|v| *v) {
			Some(ProtocolValue::Str(s)) => Some(s),
			Some(other) => {
				return Err(DecodeError::malformed("status", format!("bad proof name: {other:?}")));
			}
			None => None,
		},
		other => return Err(DecodeError::malformed("status", format!("bad proof name: {other:?}"))),
	};
	let all_proofs = string_list(el.list_child(2)?, "status")?;
	let proof_num = match el.child(3)? {
		ProtocolValue::Int(n) => n,
		other => return Err(DecodeError::malformed("status", format!("bad proof number: {other:?}"))),
	};
	Ok(ProtocolValue::Status(Status {
		path,
		proof_name,
		all_proofs,
		proof_num,
	}))
}

fn convert_message(mut el: Element) -> Result<ProtocolValue> {
	let mut level = MessageLevel::Notice;
	let mut location = None;
	for child in &el.children {
		match child {
			ProtocolValue::Level(l) => level = *l,
			ProtocolValue::Loc(loc) => location = Some(*loc),
			ProtocolValue::Optional(Some(inner)) => {
				if let ProtocolValue::Loc(loc) = inner.as_ref() {
					location = Some(*loc);
				}
			}
			_ => {}
		}
	}
	let text = el.message_body();
	Ok(ProtocolValue::Message(Message {
		level,
		location,
		text,
	}))
}

fn convert_feedback_content(mut el: Element) -> Result<ProtocolValue> {
	let kind = el.required_attr("val")?.to_owned();
	let content = match kind.as_str() {
		"processed" => FeedbackContent::Processed,
		"incomplete" => FeedbackContent::Incomplete,
		"complete" => FeedbackContent::Complete,
		"addedaxiom" => FeedbackContent::AddedAxiom,
		"processingin" => FeedbackContent::ProcessingIn(el.string_child(0)?),
		"errormsg" => {
			let location = el.children.iter().find_map(|c| match c {
				ProtocolValue::Loc(loc) => Some(*loc),
				_ => None,
			});
			FeedbackContent::ErrorMsg {
				location,
				message: el.message_body(),
			}
		}
		"message" => match el.child(0)? {
			ProtocolValue::Message(m) => FeedbackContent::Message(m),
			other => {
				return Err(DecodeError::malformed(
					"feedback_content",
					format!("expected message child, found {other:?}"),
				));
			}
		},
		"fileloaded" => FeedbackContent::FileLoaded {
			module: el.string_child(0)?,
			file: el.string_child(1)?,
		},
		"filedependency" => {
			let source = match el.child(0)? {
				ProtocolValue::Optional(opt) => match opt.map(|v| *v) {
					Some(ProtocolValue::Str(s)) => Some(s),
					_ => None,
				},
				ProtocolValue::Str(s) => Some(s),
				_ => None,
			};
			FeedbackContent::FileDependency {
				source,
				dependency: el.string_child(1)?,
			}
		}
		"workerstatus" => {
			// (id, status) arrives as a pair of strings.
			let (id, status) = match el.child(0)? {
				ProtocolValue::Pair(p) => *p,
				other => {
					return Err(DecodeError::malformed(
						"feedback_content",
						format!("expected pair child, found {other:?}"),
					));
				}
			};
			match (id, status) {
				(ProtocolValue::Str(id), ProtocolValue::Str(status)) => {
					FeedbackContent::WorkerStatus { id, status }
				}
				_ => return Err(DecodeError::malformed("feedback_content", "non-string worker status")),
			}
		}
		"custom" => {
			let name = el
				.children
				.iter()
				.find_map(|c| match c {
					ProtocolValue::Str(s) => Some(s.clone()),
					_ => None,
				})
				.unwrap_or_default();
			FeedbackContent::Custom {
				name,
				data: std::mem::take(&mut el.children),
			}
		}
		other => FeedbackContent::Other(other.to_owned()),
	};
	Ok(ProtocolValue::Feedback(Feedback {
		// Target and route are attached by the enclosing <feedback>.
		target: FeedbackTarget::State(StateId(0)),
		route: RouteId(0),
		content,
	}))
}

fn convert_feedback(mut el: Element) -> Result<ProtocolValue> {
	let route = RouteId(el.attr_int("route")?.unwrap_or(0));
	let mut target = None;
	let mut content = None;
	for child in std::mem::take(&mut el.children) {
		match child {
			ProtocolValue::StateId(id) => target = Some(FeedbackTarget::State(id)),
			ProtocolValue::EditId(id) => target = Some(FeedbackTarget::Edit(id)),
			ProtocolValue::Feedback(f) => content = Some(f.content),
			_ => {}
		}
	}
	let target = target
		.ok_or_else(|| DecodeError::malformed("feedback", "missing state or edit id"))?;
	let content =
		content.ok_or_else(|| DecodeError::malformed("feedback", "missing feedback content"))?;
	Ok(ProtocolValue::Feedback(Feedback {
		target,
		route,
		content,
	}))
}

fn convert_ltacprof_tactic(mut el: Element) -> Result<ProtocolValue> {
	let parse_f64 = |el: &Element, name: &str| -> Result<f64> {
		el.attr(name)
			.unwrap_or("0")
			.parse()
			.map_err(|_| DecodeError::malformed("ltacprof_tactic", format!("bad `{name}` attribute")))
	};
	let name = el.required_attr("name")?.to_owned();
	let total = parse_f64(&el, "total")?;
	let local = parse_f64(&el, "local")?;
	let max_total = parse_f64(&el, "max_total")?;
	let num_calls = el.attr_int("ncalls")?.unwrap_or(0);
	let tactics = std::mem::take(&mut el.children)
		.into_iter()
		.filter_map(|c| match c {
			ProtocolValue::LtacProfTactic(t) => Some(t),
			_ => None,
		})
		.collect();
	Ok(ProtocolValue::LtacProfTactic(LtacProfTactic {
		name,
		total,
		local,
		num_calls,
		max_total,
		tactics,
	}))
}

fn convert_ltacprof(mut el: Element) -> Result<ProtocolValue> {
	let total_time = el
		.attr("total_time")
		.unwrap_or("0")
		.parse()
		.map_err(|_| DecodeError::malformed("ltacprof", "bad `total_time` attribute"))?;
	let tactics = std::mem::take(&mut el.children)
		.into_iter()
		.filter_map(|c| match c {
			ProtocolValue::LtacProfTactic(t) => Some(t),
			_ => None,
		})
		.collect();
	Ok(ProtocolValue::LtacProf(LtacProfResults {
		total_time,
		tactics,
	}))
}

/// Convert one closed element into a typed value.
pub(crate) fn convert(mut el: Element) -> Result<ProtocolValue> {
	match el.name.as_str() {
		"unit" => Ok(ProtocolValue::Unit),
		"bool" => match el.required_attr("val")? {
			"true" => Ok(ProtocolValue::Bool(true)),
			"false" => Ok(ProtocolValue::Bool(false)),
			other => Err(DecodeError::malformed("bool", format!("bad boolean `{other}`"))),
		},
		"int" => el
			.text
			.trim()
			.parse()
			.map(ProtocolValue::Int)
			.map_err(|_| DecodeError::malformed("int", "non-numeric content")),
		"string" => Ok(ProtocolValue::Str(std::mem::take(&mut el.text))),
		"state_id" => Ok(ProtocolValue::StateId(StateId(
			el.attr_int("val")?
				.ok_or_else(|| DecodeError::malformed("state_id", "missing `val` attribute"))?,
		))),
		"edit_id" => Ok(ProtocolValue::EditId(EditId(
			el.attr_int("val")?
				.ok_or_else(|| DecodeError::malformed("edit_id", "missing `val` attribute"))?,
		))),
		"route_id" => Ok(ProtocolValue::RouteId(RouteId(
			el.attr_int("val")?
				.ok_or_else(|| DecodeError::malformed("route_id", "missing `val` attribute"))?,
		))),
		"pair" => {
			let second = el.child(1)?;
			let first = el.child(0)?;
			Ok(ProtocolValue::Pair(Box::new((first, second))))
		}
		"list" => Ok(ProtocolValue::List(std::mem::take(&mut el.children))),
		"option" => match el.required_attr("val")? {
			"some" => Ok(ProtocolValue::Optional(Some(Box::new(el.child(0)?)))),
			"none" => Ok(ProtocolValue::Optional(None)),
			other => Err(DecodeError::malformed("option", format!("bad option `{other}`"))),
		},
		"union" => {
			let side = match el.required_attr("val")? {
				"in_l" => UnionSide::Left,
				"in_r" => UnionSide::Right,
				other => {
					return Err(DecodeError::malformed("union", format!("bad union side `{other}`")));
				}
			};
			Ok(ProtocolValue::Union(side, Box::new(el.child(0)?)))
		}
		"loc" => {
			let start = el
				.attr_int("start")?
				.ok_or_else(|| DecodeError::malformed("loc", "missing `start`"))?;
			let stop = el
				.attr_int("stop")?
				.ok_or_else(|| DecodeError::malformed("loc", "missing `stop`"))?;
			Ok(ProtocolValue::Loc(Location {
				start: start.max(0) as usize,
				stop: stop.max(0) as usize,
			}))
		}
		"message_level" => {
			let level = match el.required_attr("val")? {
				"debug" => MessageLevel::Debug,
				"info" => MessageLevel::Info,
				"notice" => MessageLevel::Notice,
				"warning" => MessageLevel::Warning,
				"error" => MessageLevel::Error,
				other => {
					return Err(DecodeError::malformed(
						"message_level",
						format!("bad level `{other}`"),
					));
				}
			};
			Ok(ProtocolValue::Level(level))
		}
		"message" => convert_message(el),
		"feedback_content" => convert_feedback_content(el),
		"feedback" => convert_feedback(el),
		"goal" => convert_goal(el),
		"goals" => convert_goals(el),
		"status" => convert_status(el),
		"ltacprof" => convert_ltacprof(el),
		"ltacprof_tactic" => convert_ltacprof_tactic(el),
		"value" => {
			let state_id = el.children.iter().find_map(|c| match c {
				ProtocolValue::StateId(id) => Some(*id),
				_ => None,
			});
			match el.required_attr("val")? {
				"good" => {
					let inner = if el.children.is_empty() {
						ProtocolValue::Unit
					} else {
						el.child(0)?
					};
					Ok(ProtocolValue::Union(UnionSide::Left, Box::new(inner)))
				}
				"fail" => {
					let location = match (el.attr_int("loc_s")?, el.attr_int("loc_e")?) {
						(Some(s), Some(e)) => Some(Location {
							start: s.max(0) as usize,
							stop: e.max(0) as usize,
						}),
						_ => None,
					};
					let message = el.message_body();
					Ok(ProtocolValue::Union(
						UnionSide::Right,
						Box::new(ProtocolValue::Pair(Box::new((
							match (state_id, location) {
								(Some(id), _) => ProtocolValue::StateId(id),
								(None, _) => ProtocolValue::Unit,
							},
							match location {
								Some(loc) => ProtocolValue::Pair(Box::new((
									ProtocolValue::Loc(loc),
									ProtocolValue::Richpp(message),
								))),
								None => ProtocolValue::Richpp(message),
							},
						)))),
					))
				}
				other => Err(DecodeError::malformed("value", format!("bad result tag `{other}`"))),
			}
		}
		other => {
			tracing::debug!(tag = other, "unmodelled protocol tag");
			Ok(ProtocolValue::Unknown(other.to_owned()))
		}
	}
}

/// Classify a completed top-level element into a [`ProtocolEvent`].
pub(crate) fn classify(name: &str, value: ProtocolValue) -> Result<ProtocolEvent> {
	match (name, value) {
		("value", ProtocolValue::Union(UnionSide::Left, inner)) => {
			Ok(ProtocolEvent::Value(ValueReturn::Good(*inner)))
		}
		("value", ProtocolValue::Union(UnionSide::Right, inner)) => {
			let (first, second) = match *inner {
				ProtocolValue::Pair(p) => *p,
				other => (ProtocolValue::Unit, other),
			};
			let state_id = match first {
				ProtocolValue::StateId(id) => Some(id),
				_ => None,
			};
			let (location, message) = match second {
				ProtocolValue::Pair(p) => {
					let (loc, msg) = *p;
					let location = match loc {
						ProtocolValue::Loc(l) => Some(l),
						_ => None,
					};
					(location, msg.into_text().unwrap_or_default())
				}
				other => (None, other.into_text().unwrap_or_default()),
			};
			Ok(ProtocolEvent::Value(ValueReturn::Fail {
				state_id,
				location,
				message,
			}))
		}
		("feedback", ProtocolValue::Feedback(f)) => Ok(ProtocolEvent::Feedback(f)),
		("message", ProtocolValue::Message(m)) => Ok(ProtocolEvent::Message(m)),
		(name, value) => Ok(ProtocolEvent::Other(name.to_owned(), value)),
	}
}
