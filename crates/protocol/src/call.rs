//! Request frames and the version-gated call syntax table.
//!
//! Each [`Call`] renders to exactly one `<call val="...">` frame. Argument
//! shapes that changed across prover releases are captured once in
//! [`ProtocolVariant`], resolved from the probed version at session start;
//! the encoder itself carries no version conditionals.

use std::fmt::Write as _;
use std::sync::LazyLock;

use semver::{Version, VersionReq};

use crate::values::{EditId, RouteId, StateId};

/// Value payload of a `SetOptions` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
	Bool(bool),
	Int(Option<i64>),
	Str(String),
}

/// A request to the prover's command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	/// Initialize the session; returns the root state handle.
	Init {
		script_path: Option<String>,
	},
	/// Interpret one command on top of `state_id`.
	Add {
		command: String,
		edit_id: EditId,
		state_id: StateId,
		verbose: bool,
	},
	/// Roll back to a previously accepted state handle.
	EditAt {
		state_id: StateId,
	},
	/// Request the current goal state.
	Goal,
	/// Request prover status; `force` also finishes background proofs.
	Status {
		force: bool,
	},
	/// Run a query command against a state, tagging output with a route.
	Query {
		route: RouteId,
		text: String,
		state_id: StateId,
	},
	/// Set prover options by their dotted names.
	SetOptions(Vec<(Vec<String>, OptionValue)>),
	Quit,
}

/// Call syntax profile for a prover release line.
///
/// Resolved once per session from the probed version; the table below maps
/// version ranges to profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVariant {
	/// Queries carry a route id (8.7 and later).
	pub query_routes: bool,
}

static VARIANT_TABLE: LazyLock<Vec<(VersionReq, ProtocolVariant)>> = LazyLock::new(|| {
	vec![
		(
			VersionReq::parse("< 8.7").expect("static version range"),
			ProtocolVariant { query_routes: false },
		),
		(
			VersionReq::parse(">= 8.7").expect("static version range"),
			ProtocolVariant { query_routes: true },
		),
	]
});

impl ProtocolVariant {
	/// Resolve the call syntax for a prover version.
	pub fn for_version(version: &Version) -> Self {
		VARIANT_TABLE
			.iter()
			.find(|(req, _)| req.matches(version))
			.map(|(_, variant)| *variant)
			.unwrap_or(ProtocolVariant { query_routes: true })
	}
}

fn escape_into(out: &mut String, raw: &str) {
	for c in raw.chars() {
		match c {
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'&' => out.push_str("&amp;"),
			'\'' => out.push_str("&apos;"),
			'"' => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
}

fn write_string(out: &mut String, s: &str) {
	out.push_str("<string>");
	escape_into(out, s);
	out.push_str("</string>");
}

fn write_state_id(out: &mut String, id: StateId) {
	let _ = write!(out, r#"<state_id val="{}"/>"#, id.0);
}

fn write_bool(out: &mut String, b: bool) {
	let _ = write!(out, r#"<bool val="{b}"/>"#);
}

fn write_option_value(out: &mut String, value: &OptionValue) {
	match value {
		OptionValue::Bool(b) => {
			out.push_str(r#"<option_value val="boolvalue">"#);
			write_bool(out, *b);
			out.push_str("</option_value>");
		}
		OptionValue::Int(n) => {
			out.push_str(r#"<option_value val="intvalue">"#);
			match n {
				Some(n) => {
					let _ = write!(out, r#"<option val="some"><int>{n}</int></option>"#);
				}
				None => out.push_str(r#"<option val="none"/>"#),
			}
			out.push_str("</option_value>");
		}
		OptionValue::Str(s) => {
			out.push_str(r#"<option_value val="stringvalue">"#);
			write_string(out, s);
			out.push_str("</option_value>");
		}
	}
}

impl Call {
	/// Wire name of the call, as carried in the `val` attribute.
	pub fn name(&self) -> &'static str {
		match self {
			Call::Init { .. } => "Init",
			Call::Add { .. } => "Add",
			Call::EditAt { .. } => "Edit_at",
			Call::Goal => "Goal",
			Call::Status { .. } => "Status",
			Call::Query { .. } => "Query",
			Call::SetOptions(_) => "SetOptions",
			Call::Quit => "Quit",
		}
	}

	/// Render the call as one request frame.
	pub fn to_frame(&self, variant: ProtocolVariant) -> String {
		let mut out = String::new();
		let _ = write!(out, r#"<call val="{}">"#, self.name());
		match self {
			Call::Init { script_path } => match script_path {
				Some(path) => {
					out.push_str(r#"<option val="some">"#);
					write_string(&mut out, path);
					out.push_str("</option>");
				}
				None => out.push_str(r#"<option val="none"/>"#),
			},
			Call::Add {
				command,
				edit_id,
				state_id,
				verbose,
			} => {
				out.push_str("<pair><pair>");
				write_string(&mut out, command);
				let _ = write!(out, "<int>{}</int>", edit_id.0);
				out.push_str("</pair><pair>");
				write_state_id(&mut out, *state_id);
				write_bool(&mut out, *verbose);
				out.push_str("</pair></pair>");
			}
			Call::EditAt { state_id } => write_state_id(&mut out, *state_id),
			Call::Goal => out.push_str("<unit/>"),
			Call::Status { force } => write_bool(&mut out, *force),
			Call::Query {
				route,
				text,
				state_id,
			} => {
				if variant.query_routes {
					let _ = write!(out, r#"<pair><route_id val="{}"/><pair>"#, route.0);
					write_string(&mut out, text);
					write_state_id(&mut out, *state_id);
					out.push_str("</pair></pair>");
				} else {
					out.push_str("<pair>");
					write_string(&mut out, text);
					write_state_id(&mut out, *state_id);
					out.push_str("</pair>");
				}
			}
			Call::SetOptions(options) => {
				out.push_str("<list>");
				for (name, value) in options {
					out.push_str("<pair><list>");
					for part in name {
						write_string(&mut out, part);
					}
					out.push_str("</list>");
					write_option_value(&mut out, value);
					out.push_str("</pair>");
				}
				out.push_str("</list>");
			}
			Call::Quit => out.push_str("<unit/>"),
		}
		out.push_str("</call>");
		out
	}
}
