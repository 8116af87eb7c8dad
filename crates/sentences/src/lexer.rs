//! The command lexer: how far does the next complete sentence extend?
//!
//! Proof scripts are segmented by a handful of lexical rules rather than a
//! real grammar: a sentence ends at a period followed by whitespace or end
//! of input, except that periods inside strings, comments, and qualified
//! names do not count, and `..` is a token of its own. Bullet characters
//! and solitary curly braces each form a one-token sentence in proof mode.

/// Outcome of scanning for the next sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
	/// A complete sentence of this many characters, counted from the start
	/// of the input and including leading whitespace and comments.
	Command(usize),
	/// Text remains but no terminator has appeared yet.
	Incomplete,
	/// Only whitespace and comments remain.
	End,
}

/// Scan `text` for the length of its first complete sentence.
///
/// Lengths are in characters, so callers indexing by char offset can slice
/// directly.
pub fn command_length(text: &str) -> Next {
	let chars: Vec<char> = text.chars().collect();
	let len = chars.len();
	let mut i = 0;

	// Leading whitespace and comments belong to the sentence they precede.
	loop {
		while i < len && chars[i].is_whitespace() {
			i += 1;
		}
		if i + 1 < len && chars[i] == '(' && chars[i + 1] == '*' {
			match skip_comment(&chars, i) {
				Some(after) => i = after,
				None => return Next::Incomplete,
			}
		} else {
			break;
		}
	}
	if i >= len {
		return Next::End;
	}

	match chars[i] {
		// A bullet is a maximal run of one bullet character.
		bullet @ ('-' | '+' | '*') => {
			let mut j = i;
			while j < len && chars[j] == bullet {
				j += 1;
			}
			return Next::Command(j);
		}
		'{' | '}' => return Next::Command(i + 1),
		_ => {}
	}

	let mut j = i;
	while j < len {
		match chars[j] {
			'"' => match skip_string(&chars, j) {
				Some(after) => j = after,
				None => return Next::Incomplete,
			},
			'(' if chars.get(j + 1) == Some(&'*') => match skip_comment(&chars, j) {
				Some(after) => j = after,
				None => return Next::Incomplete,
			},
			'.' => {
				let mut run = j;
				while run < len && chars[run] == '.' {
					run += 1;
				}
				let dots = run - j;
				let delimited = run >= len || chars[run].is_whitespace();
				// `..` is the notation ellipsis token; one dot and the
				// three-dot tactic ender both terminate when delimited.
				if dots != 2 && delimited {
					return Next::Command(run);
				}
				j = run;
			}
			_ => j += 1,
		}
	}
	Next::Incomplete
}

/// Strip leading whitespace and comments, for callers that inspect the
/// first token of a sentence. Returns the remainder and the number of
/// characters stripped.
pub(crate) fn strip_leading_trivia(text: &str) -> (&str, usize) {
	let chars: Vec<char> = text.chars().collect();
	let len = chars.len();
	let mut i = 0;
	loop {
		while i < len && chars[i].is_whitespace() {
			i += 1;
		}
		if i + 1 < len && chars[i] == '(' && chars[i + 1] == '*' {
			match skip_comment(&chars, i) {
				Some(after) => i = after,
				None => break,
			}
		} else {
			break;
		}
	}
	let byte = text
		.char_indices()
		.nth(i)
		.map_or(text.len(), |(b, _)| b);
	(&text[byte..], i)
}

/// Skip a `(*`-comment starting at `start`, handling nesting and string
/// literals within the comment. Returns the index just past `*)`.
fn skip_comment(chars: &[char], start: usize) -> Option<usize> {
	let len = chars.len();
	let mut depth = 1;
	let mut i = start + 2;
	while i < len {
		match chars[i] {
			'(' if chars.get(i + 1) == Some(&'*') => {
				depth += 1;
				i += 2;
			}
			'*' if chars.get(i + 1) == Some(&')') => {
				depth -= 1;
				i += 2;
				if depth == 0 {
					return Some(i);
				}
			}
			'"' => i = skip_string(chars, i)?,
			_ => i += 1,
		}
	}
	None
}

/// Skip a string literal starting at the opening quote; `""` escapes a
/// quote. Returns the index just past the closing quote.
fn skip_string(chars: &[char], start: usize) -> Option<usize> {
	let len = chars.len();
	let mut i = start + 1;
	while i < len {
		if chars[i] == '"' {
			if chars.get(i + 1) == Some(&'"') {
				i += 2;
			} else {
				return Some(i + 1);
			}
		} else {
			i += 1;
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn first(text: &str) -> &str {
		match command_length(text) {
			Next::Command(n) => {
				let end = text.char_indices().nth(n).map_or(text.len(), |(b, _)| b);
				&text[..end]
			}
			other => panic!("expected a command in {text:?}, got {other:?}"),
		}
	}

	#[test]
	fn test_simple_sentence_ends_at_delimited_period() {
		assert_eq!(first("Check nat. Check bool."), "Check nat.");
	}

	#[test]
	fn test_leading_whitespace_and_comment_are_included() {
		assert_eq!(first("  (* intro *)\nCheck nat. rest"), "  (* intro *)\nCheck nat.");
	}

	#[test]
	fn test_qualified_name_does_not_terminate() {
		assert_eq!(first("Check Nat.add. rest"), "Check Nat.add.");
	}

	#[test]
	fn test_period_inside_string_does_not_terminate() {
		assert_eq!(first(r#"Fail Msg "a. b". rest"#), r#"Fail Msg "a. b"."#);
	}

	#[test]
	fn test_doubled_quote_escape_inside_string() {
		assert_eq!(
			first(r#"Notation "x"" ." := x. rest"#),
			r#"Notation "x"" ." := x."#
		);
	}

	#[test]
	fn test_nested_comment_is_skipped() {
		assert_eq!(
			first("Check (* outer (* inner *) still *) nat. rest"),
			"Check (* outer (* inner *) still *) nat."
		);
	}

	#[test]
	fn test_comment_containing_string_with_close_marker() {
		assert_eq!(first(r#"Check (* "*)" *) nat. rest"#), r#"Check (* "*)" *) nat."#);
	}

	#[test]
	fn test_notation_ellipsis_is_not_a_terminator() {
		assert_eq!(
			first(r#"Notation "[ x ; .. ; y ]" := (cons x .. (cons y nil) ..). rest"#),
			r#"Notation "[ x ; .. ; y ]" := (cons x .. (cons y nil) ..)."#
		);
	}

	#[test]
	fn test_three_dots_terminate() {
		assert_eq!(first("solve [auto]... rest"), "solve [auto]...");
	}

	#[test]
	fn test_period_at_end_of_input_terminates() {
		assert_eq!(first("Qed."), "Qed.");
	}

	#[test]
	fn test_bullet_runs_are_single_sentences() {
		assert_eq!(first("- intros."), "-");
		assert_eq!(first("  -- auto."), "  --");
		assert_eq!(first("*** x"), "***");
		assert_eq!(first("+ y"), "+");
	}

	#[test]
	fn test_solitary_braces_are_sentences() {
		assert_eq!(first("{ intros. }"), "{");
		assert_eq!(first("} Qed."), "}");
	}

	#[test]
	fn test_incomplete_cases() {
		assert_eq!(command_length("Check nat"), Next::Incomplete);
		assert_eq!(command_length("(* unclosed"), Next::Incomplete);
		assert_eq!(command_length(r#"Check "open"#), Next::Incomplete);
		assert_eq!(command_length("Definition x := 1"), Next::Incomplete);
	}

	#[test]
	fn test_end_cases() {
		assert_eq!(command_length(""), Next::End);
		assert_eq!(command_length("   \n\t"), Next::End);
		assert_eq!(command_length(" (* only a comment *) "), Next::End);
	}
}
