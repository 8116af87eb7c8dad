//! The renderable view of a goal state.
//!
//! Raw goals arrive with each hypothesis as one flat text; the view splits
//! them into identifier, relation, and expression so renderers can align
//! columns without re-parsing.

use vernac_protocol::{Goal, Goals};
use vernac_text::AnnotatedText;

/// One hypothesis, split at its first `:` or `:=`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
	pub identifier: String,
	/// `":"` or `":="`; empty when the split failed.
	pub relation: String,
	pub expression: AnnotatedText,
}

impl Hypothesis {
	/// Split `text` into its parts, falling back to an empty identifier
	/// when the text is not of the expected shape.
	pub fn parse(text: &AnnotatedText) -> Hypothesis {
		let plain = text.to_plain_string();
		let colon = plain.find(':');
		match colon {
			Some(at) if at > 0 => {
				let relation = if plain[at..].starts_with(":=") { ":=" } else { ":" };
				let expression = plain[at + relation.len()..].trim_start().to_owned();
				Hypothesis {
					identifier: plain[..at].trim_end().to_owned(),
					relation: relation.to_owned(),
					expression: AnnotatedText::Plain(expression),
				}
			}
			_ => Hypothesis {
				identifier: String::new(),
				relation: String::new(),
				expression: text.clone(),
			},
		}
	}
}

/// One goal with split hypotheses.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofGoal {
	pub id: String,
	pub hypotheses: Vec<Hypothesis>,
	pub goal: AnnotatedText,
}

impl From<Goal> for ProofGoal {
	fn from(goal: Goal) -> Self {
		ProofGoal {
			id: goal.id,
			hypotheses: goal.hypotheses.iter().map(Hypothesis::parse).collect(),
			goal: goal.conclusion,
		}
	}
}

/// The full goal state, shaped for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProofView {
	/// Goals in focus, in order.
	pub goals: Vec<ProofGoal>,
	/// Unfocused goal stack, innermost first, as `(before, after)` pairs.
	pub background: Vec<(Vec<ProofGoal>, Vec<ProofGoal>)>,
	pub shelved: Vec<ProofGoal>,
	pub abandoned: Vec<ProofGoal>,
}

impl From<Goals> for ProofView {
	fn from(goals: Goals) -> Self {
		let convert = |list: Vec<Goal>| list.into_iter().map(ProofGoal::from).collect();
		ProofView {
			goals: convert(goals.foreground),
			background: goals
				.background
				.into_iter()
				.map(|(before, after)| (convert(before), convert(after)))
				.collect(),
			shelved: convert(goals.shelved),
			abandoned: convert(goals.abandoned),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn test_split_plain_typing() {
		let h = Hypothesis::parse(&AnnotatedText::Plain("n : nat".to_owned()));
		assert_eq!(h.identifier, "n");
		assert_eq!(h.relation, ":");
		assert_eq!(h.expression.to_plain_string(), "nat");
	}

	#[test]
	fn test_split_body_binding() {
		let h = Hypothesis::parse(&AnnotatedText::Plain("x := 2 + 2 : nat".to_owned()));
		assert_eq!(h.identifier, "x");
		assert_eq!(h.relation, ":=");
		assert_eq!(h.expression.to_plain_string(), "2 + 2 : nat");
	}

	#[test]
	fn test_unsplittable_text_is_kept_whole() {
		let raw = AnnotatedText::Plain("garbled".to_owned());
		let h = Hypothesis::parse(&raw);
		assert_eq!(h.identifier, "");
		assert_eq!(h.expression, raw);
	}

	#[test]
	fn test_view_conversion_preserves_structure() {
		let goals = Goals {
			foreground: vec![Goal {
				id: "1".to_owned(),
				hypotheses: vec![AnnotatedText::Plain("n : nat".to_owned())],
				conclusion: AnnotatedText::Plain("n = n".to_owned()),
			}],
			background: vec![(Vec::new(), vec![Goal {
				id: "2".to_owned(),
				hypotheses: Vec::new(),
				conclusion: AnnotatedText::Plain("True".to_owned()),
			}])],
			shelved: Vec::new(),
			abandoned: Vec::new(),
		};
		let view = ProofView::from(goals);
		assert_eq!(view.goals.len(), 1);
		assert_eq!(view.goals[0].hypotheses[0].identifier, "n");
		assert_eq!(view.background[0].1[0].goal.to_plain_string(), "True");
	}
}
