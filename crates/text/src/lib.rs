//! Recursive annotated-text model for prover output.
//!
//! The prover reports goals, hypotheses and error messages as rich text:
//! plain strings wrapped in nested scopes (for semantic highlighting) and
//! annotations carrying diff or substitution metadata (for proof-diff and
//! prettified rendering). This crate defines the value type and the two
//! order-preserving folds over it:
//!
//! - [`AnnotatedText::to_plain_string`] ignores all metadata and yields the
//!   literal text.
//! - [`AnnotatedText::to_display_string`] renders substitutions instead of
//!   the text they replace.
//!
//! The structure is produced bottom-up by the protocol decoder and is always
//! finite; both folds are plain structural recursions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Relationship of a span of text to the corresponding span in another
/// proof state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDiff {
	/// The text is new relative to the other state.
	Added,
	/// The text was removed relative to the other state.
	Removed,
}

/// A span of text carrying diff and/or substitution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextAnnotation {
	/// Diff relationship to another state, if any.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diff: Option<TextDiff>,
	/// What to display instead of this text, if anything.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub substitution: Option<String>,
	/// The underlying text, possibly with further annotations.
	pub text: AnnotatedText,
}

/// A span of text labelled with a scope identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedText {
	/// Scope identifier, e.g. `constr.variable`.
	pub scope: String,
	/// Extra attributes attached to the scope.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub attributes: BTreeMap<String, String>,
	/// The underlying text, possibly with further annotations.
	pub text: AnnotatedText,
}

/// Rich text produced by the prover.
///
/// Every leaf is eventually a [`Plain`](AnnotatedText::Plain) string; the
/// structure carries no cycles, so folds terminate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotatedText {
	/// A literal string.
	Plain(String),
	/// Text with diff/substitution metadata.
	Annotated(Box<TextAnnotation>),
	/// Text labelled with a scope.
	Scoped(Box<ScopedText>),
	/// An ordered sequence of the above.
	Seq(Vec<AnnotatedText>),
}

impl AnnotatedText {
	/// An empty text value.
	pub fn empty() -> Self {
		AnnotatedText::Plain(String::new())
	}

	/// Fold to the literal text, ignoring all metadata.
	pub fn to_plain_string(&self) -> String {
		let mut out = String::new();
		self.fold_plain(&mut out);
		out
	}

	fn fold_plain(&self, out: &mut String) {
		match self {
			AnnotatedText::Plain(s) => out.push_str(s),
			AnnotatedText::Annotated(a) => a.text.fold_plain(out),
			AnnotatedText::Scoped(s) => s.text.fold_plain(out),
			AnnotatedText::Seq(items) => {
				for item in items {
					item.fold_plain(out);
				}
			}
		}
	}

	/// Fold to the display text: wherever an annotation carries a
	/// substitution, the substitution is rendered and the annotated
	/// subtree is not visited.
	pub fn to_display_string(&self) -> String {
		let mut out = String::new();
		self.fold_display(&mut out);
		out
	}

	fn fold_display(&self, out: &mut String) {
		match self {
			AnnotatedText::Plain(s) => out.push_str(s),
			AnnotatedText::Annotated(a) => match &a.substitution {
				Some(sub) => out.push_str(sub),
				None => a.text.fold_display(out),
			},
			AnnotatedText::Scoped(s) => s.text.fold_display(out),
			AnnotatedText::Seq(items) => {
				for item in items {
					item.fold_display(out);
				}
			}
		}
	}

	/// Whether the plain fold of this value is empty.
	pub fn is_empty(&self) -> bool {
		match self {
			AnnotatedText::Plain(s) => s.is_empty(),
			AnnotatedText::Annotated(a) => a.text.is_empty(),
			AnnotatedText::Scoped(s) => s.text.is_empty(),
			AnnotatedText::Seq(items) => items.iter().all(AnnotatedText::is_empty),
		}
	}

	/// Collapse single-element sequences and merge adjacent plain strings.
	///
	/// The folds are invariant under normalization; the decoder uses this
	/// to avoid emitting spurious one-element sequences.
	pub fn normalized(self) -> Self {
		match self {
			AnnotatedText::Plain(s) => AnnotatedText::Plain(s),
			AnnotatedText::Annotated(mut a) => {
				a.text = a.text.normalized();
				AnnotatedText::Annotated(a)
			}
			AnnotatedText::Scoped(mut s) => {
				s.text = s.text.normalized();
				AnnotatedText::Scoped(s)
			}
			AnnotatedText::Seq(items) => {
				let mut merged: Vec<AnnotatedText> = Vec::with_capacity(items.len());
				for item in items {
					let item = item.normalized();
					match (merged.last_mut(), item) {
						(Some(AnnotatedText::Plain(prev)), AnnotatedText::Plain(next)) => {
							prev.push_str(&next);
						}
						(_, item) => merged.push(item),
					}
				}
				if merged.len() == 1 {
					merged.pop().unwrap()
				} else {
					AnnotatedText::Seq(merged)
				}
			}
		}
	}

	/// Append another value, producing a sequence when necessary.
	pub fn append(self, other: AnnotatedText) -> Self {
		match self {
			AnnotatedText::Seq(mut items) => {
				items.push(other);
				AnnotatedText::Seq(items)
			}
			AnnotatedText::Plain(s) if s.is_empty() => other,
			this => AnnotatedText::Seq(vec![this, other]),
		}
	}
}

impl Default for AnnotatedText {
	fn default() -> Self {
		AnnotatedText::empty()
	}
}

impl From<&str> for AnnotatedText {
	fn from(s: &str) -> Self {
		AnnotatedText::Plain(s.to_owned())
	}
}

impl From<String> for AnnotatedText {
	fn from(s: String) -> Self {
		AnnotatedText::Plain(s)
	}
}

impl fmt::Display for AnnotatedText {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_display_string())
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn scoped(scope: &str, text: AnnotatedText) -> AnnotatedText {
		AnnotatedText::Scoped(Box::new(ScopedText {
			scope: scope.to_owned(),
			attributes: BTreeMap::new(),
			text,
		}))
	}

	#[test]
	fn test_plain_and_display_agree_without_metadata() {
		let value = AnnotatedText::Seq(vec![
			"Lemma ".into(),
			scoped("constr.reference", "plus_comm".into()),
			AnnotatedText::Seq(vec![" : ".into(), scoped("constr.type", "forall n m, n + m = m + n".into())]),
		]);
		assert_eq!(value.to_plain_string(), value.to_display_string());
		assert_eq!(value.to_plain_string(), "Lemma plus_comm : forall n m, n + m = m + n");
	}

	#[test]
	fn test_display_renders_substitution() {
		let value = AnnotatedText::Annotated(Box::new(TextAnnotation {
			diff: None,
			substitution: Some("y".to_owned()),
			text: "x".into(),
		}));
		assert_eq!(value.to_display_string(), "y");
		assert_eq!(value.to_plain_string(), "x");
	}

	#[test]
	fn test_diff_does_not_affect_folds() {
		let value = AnnotatedText::Annotated(Box::new(TextAnnotation {
			diff: Some(TextDiff::Added),
			substitution: None,
			text: "nat".into(),
		}));
		assert_eq!(value.to_plain_string(), "nat");
		assert_eq!(value.to_display_string(), "nat");
	}

	#[test]
	fn test_normalized_collapses_singleton_and_merges_plain() {
		let value = AnnotatedText::Seq(vec![AnnotatedText::Seq(vec![
			"a".into(),
			"b".into(),
			scoped("s", AnnotatedText::Seq(vec!["c".into()])),
		])]);
		let normalized = value.clone().normalized();
		assert_eq!(normalized.to_plain_string(), value.to_plain_string());
		let AnnotatedText::Seq(items) = &normalized else {
			panic!("expected sequence, got {normalized:?}");
		};
		assert_eq!(items.len(), 2);
		assert_eq!(items[0], AnnotatedText::Plain("ab".to_owned()));
	}

	#[test]
	fn test_append_flattens_into_sequence() {
		let value = AnnotatedText::from("a").append("b".into()).append("c".into());
		assert_eq!(value.to_plain_string(), "abc");
		let AnnotatedText::Seq(items) = value else {
			panic!("expected sequence");
		};
		assert_eq!(items.len(), 3);
	}

	#[test]
	fn test_serde_round_trip() {
		let value = AnnotatedText::Seq(vec![
			"goal: ".into(),
			AnnotatedText::Annotated(Box::new(TextAnnotation {
				diff: Some(TextDiff::Removed),
				substitution: None,
				text: "False".into(),
			})),
		]);
		let json = serde_json::to_string(&value).expect("serialize");
		let back: AnnotatedText = serde_json::from_str(&json).expect("deserialize");
		assert_eq!(back.to_plain_string(), value.to_plain_string());
	}
}
