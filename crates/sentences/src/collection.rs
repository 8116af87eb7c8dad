//! The ordered, identity-stable sentence collection.
//!
//! Sentences tile the document from the start: each one owns its leading
//! whitespace and comments, so concatenating every sentence's text
//! reproduces the document prefix they cover. Identity is the load-bearing
//! property here: a sentence whose text and boundaries survive an edit
//! batch keeps its id even when its offset shifts, which is what lets the
//! state machine diff cheaply against the sentences it already sent.

use std::collections::HashMap;
use std::ops::Range;

use ropey::Rope;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::lexer::{Next, command_length};
use crate::scopes::{ScopeDeclaration, ScopeFlags, SymbolMatch, parse_scope};
use crate::{ApplyError, Result};

/// Stable identity of a sentence across edits of unrelated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SentenceId(pub u64);

/// One segmented command span.
///
/// Offsets and lengths are in characters. Only the collection mutates
/// these fields; external readers receive clones.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
	pub id: SentenceId,
	/// Character offset of the span start (including leading trivia).
	pub offset: usize,
	pub text: String,
	pub prev: Option<SentenceId>,
	pub next: Option<SentenceId>,
	/// False for a trailing span that has no terminator yet.
	pub complete: bool,
	pub scope: Option<ScopeDeclaration>,
}

impl Sentence {
	/// Span length in characters.
	pub fn len(&self) -> usize {
		self.text.chars().count()
	}

	pub fn is_empty(&self) -> bool {
		self.text.is_empty()
	}

	/// Character offset one past the span end.
	pub fn end(&self) -> usize {
		self.offset + self.len()
	}

	pub fn range(&self) -> Range<usize> {
		self.offset..self.end()
	}

	pub fn contains(&self, offset: usize) -> bool {
		self.range().contains(&offset)
	}
}

/// One edit: replace the character range with the new text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
	pub range: Range<usize>,
	pub text: String,
}

/// Which sentences an edit batch created, destroyed, or patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
	pub added: Vec<SentenceId>,
	pub removed: Vec<SentenceId>,
	pub patched: Vec<SentenceId>,
}

impl ChangeSummary {
	/// True when the batch left every sentence untouched (offset shifts
	/// aside).
	pub fn is_unchanged(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.patched.is_empty()
	}
}

/// A resolved symbol, tagged with the sentence that declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInformation {
	pub source: SentenceId,
	pub symbol: SymbolMatch,
}

/// The document text and its segmentation into sentences.
#[derive(Clone)]
pub struct SentenceCollection {
	text: Rope,
	version: i32,
	order: Vec<SentenceId>,
	arena: HashMap<SentenceId, Sentence>,
	next_id: u64,
}

impl SentenceCollection {
	/// Segment `text` from scratch.
	pub fn new(text: &str, version: i32) -> Self {
		let mut collection = Self {
			text: Rope::from_str(text),
			version,
			order: Vec::new(),
			arena: HashMap::new(),
			next_id: 0,
		};
		let mut summary = ChangeSummary::default();
		collection.resegment(0, Vec::new(), usize::MAX, &mut summary);
		collection
	}

	pub fn version(&self) -> i32 {
		self.version
	}

	/// The full document text.
	pub fn get_text(&self) -> String {
		self.text.to_string()
	}

	/// Concatenation of every sentence's text, in order.
	///
	/// Equals the document prefix the sentences cover; comparing it
	/// against [`get_text`](Self::get_text) is the segmentation
	/// self-check.
	pub fn sentence_text(&self) -> String {
		self.order
			.iter()
			.map(|id| self.arena[id].text.as_str())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	pub fn sentence(&self, id: SentenceId) -> Option<&Sentence> {
		self.arena.get(&id)
	}

	/// The sentence whose span contains `offset`.
	pub fn sentence_at(&self, offset: usize) -> Option<&Sentence> {
		let idx = self
			.order
			.partition_point(|id| self.arena[id].offset <= offset);
		let id = self.order.get(idx.checked_sub(1)?)?;
		let sentence = &self.arena[id];
		sentence.contains(offset).then_some(sentence)
	}

	/// Ordered snapshot of all sentences.
	pub fn sentences(&self) -> Vec<Sentence> {
		self.order.iter().map(|id| self.arena[id].clone()).collect()
	}

	/// Ordered ids of the sentences starting before `offset`.
	///
	/// This is the run a caller must process to reach `offset`: every
	/// sentence ending at or before it, plus the one containing it.
	pub fn sentence_prefix_at(&self, offset: usize) -> Vec<SentenceId> {
		self.order
			.iter()
			.take_while(|id| self.arena[id].offset < offset)
			.copied()
			.collect()
	}

	/// Resolve a qualified name as seen from `from`, walking backward.
	pub fn lookup_symbol(
		&self,
		from: SentenceId,
		id: &[String],
		flags: ScopeFlags,
	) -> Vec<SymbolInformation> {
		let position = match self.order.iter().position(|s| *s == from) {
			Some(position) => position,
			None => return Vec::new(),
		};
		// Scope-less sentences still take part in the walk: the first
		// declaration examined is the only one whose private names show.
		let backward = self.order[..=position]
			.iter()
			.rev()
			.map(|id| (*id, self.arena[id].scope.clone().unwrap_or_default()));
		crate::scopes::lookup(backward, id, flags)
			.into_iter()
			.map(|(source, symbol)| SymbolInformation { source, symbol })
			.collect()
	}

	/// Apply one edit batch tagged with the version it produces.
	///
	/// Edits are applied in descending start order so each edit's
	/// coordinates stay valid while the ones before it in the batch are
	/// processed. Fully-interior edits that keep a sentence lexing to the
	/// same single command are patched in place; anything else
	/// invalidates through the next boundary and re-segments forward.
	pub fn apply_changes(&mut self, version: i32, changes: &[TextChange]) -> Result<ChangeSummary> {
		if version <= self.version {
			return Err(ApplyError::StaleVersion {
				current: self.version,
				received: version,
			});
		}

		// Ranges are in pre-batch coordinates; reject the whole batch
		// before touching anything.
		let doc_len = self.text.len_chars();
		for change in changes {
			let Range { start, end } = change.range;
			if start > end || end > doc_len {
				return Err(ApplyError::InvalidRange {
					start,
					end,
					len: doc_len,
				});
			}
		}

		let mut sorted: Vec<&TextChange> = changes.iter().collect();
		sorted.sort_by(|a, b| b.range.start.cmp(&a.range.start));

		let mut summary = ChangeSummary::default();
		// Invalidated region in final coordinates; re-segmentation starts
		// at `dirty_from` and identity resync is allowed past `dirty_to`.
		let mut dirty_from: Option<usize> = None;
		let mut dirty_to: usize = 0;
		// Sentences whose stored text no longer matches the rope.
		let mut stale: Vec<SentenceId> = Vec::new();

		for change in sorted {
			let Range { start, end } = change.range;
			let new_len = change.text.chars().count();
			let delta = new_len as i64 - (end - start) as i64;

			self.text.remove(start..end);
			self.text.insert(start, &change.text);

			// This edit shifts every later position, including regions
			// already marked dirty by previously processed edits.
			let shift = |offset: usize| -> usize {
				(offset as i64 + delta).max(0) as usize
			};
			if let Some(from) = dirty_from {
				dirty_from = Some(if from >= end { shift(from) } else { from });
			}
			if dirty_to >= end {
				dirty_to = shift(dirty_to);
			}

			if self.try_patch(change, delta, &stale, &mut summary) {
				continue;
			}

			// Invalidate from the start of the first overlapping sentence.
			let inv = self
				.order
				.iter()
				.map(|id| &self.arena[id])
				.find(|s| s.end() > start)
				.map(|s| s.offset.min(start))
				.unwrap_or(start);
			dirty_from = Some(dirty_from.map_or(inv, |v| v.min(inv)));
			dirty_to = dirty_to.max(start + new_len);

			for id in &self.order {
				let sentence = self.arena.get_mut(id).expect("arena entry");
				if sentence.offset >= end {
					sentence.offset = shift(sentence.offset);
				} else if sentence.end() > start {
					stale.push(*id);
				}
			}
		}

		if let Some(from) = dirty_from {
			self.resegment(from, stale, dirty_to, &mut summary);
		}
		self.version = version;
		trace!(
			version,
			added = summary.added.len(),
			removed = summary.removed.len(),
			patched = summary.patched.len(),
			"applied edit batch"
		);
		Ok(summary)
	}

	/// Fast path: the edit is interior to one clean sentence and the
	/// patched text still lexes to exactly one complete command.
	fn try_patch(
		&mut self,
		change: &TextChange,
		delta: i64,
		stale: &[SentenceId],
		summary: &mut ChangeSummary,
	) -> bool {
		let Range { start, end } = change.range;
		let container = self.order.iter().position(|id| {
			let s = &self.arena[id];
			s.offset <= start && end <= s.end()
		});
		let Some(idx) = container else {
			return false;
		};
		let id = self.order[idx];
		if stale.contains(&id) || !self.arena[&id].complete {
			return false;
		}

		let sentence = &self.arena[&id];
		let local_start = start - sentence.offset;
		let local_end = end - sentence.offset;
		let mut patched: String = sentence.text.chars().take(local_start).collect();
		patched.push_str(&change.text);
		patched.extend(sentence.text.chars().skip(local_end));

		let patched_len = patched.chars().count();
		if !matches!(command_length(&patched), Next::Command(n) if n == patched_len) {
			return false;
		}

		let sentence = self.arena.get_mut(&id).expect("arena entry");
		sentence.text = patched;
		sentence.scope = parse_scope(&sentence.text, sentence.offset);
		if !summary.patched.contains(&id) {
			summary.patched.push(id);
		}
		for later in &self.order[idx + 1..] {
			let s = self.arena.get_mut(later).expect("arena entry");
			s.offset = (s.offset as i64 + delta).max(0) as usize;
		}
		true
	}

	/// Re-lex forward from the last confirmed boundary before `from`.
	///
	/// Past `resync_after`, a freshly lexed command that coincides with a
	/// surviving old sentence (same offset, same text) proves the rest of
	/// the tail is unchanged, so the old sentences are spliced back in
	/// with their identities intact.
	fn resegment(
		&mut self,
		from: usize,
		stale: Vec<SentenceId>,
		resync_after: usize,
		summary: &mut ChangeSummary,
	) {
		let keep = self
			.order
			.iter()
			.take_while(|id| {
				let s = &self.arena[id];
				s.complete && s.end() <= from && !stale.contains(id)
			})
			.count();
		let start_offset = if keep == 0 {
			0
		} else {
			self.arena[&self.order[keep - 1]].end()
		};

		let mut old_tail: Vec<SentenceId> = self.order.split_off(keep);
		let full = self.text.to_string();
		let mut byte = char_to_byte(&full, start_offset);
		let mut offset = start_offset;

		loop {
			let suffix = &full[byte..];
			match command_length(suffix) {
				Next::End => break,
				Next::Incomplete => {
					let text = suffix.to_owned();
					let reused = old_tail.first().is_some_and(|id| {
						let s = &self.arena[id];
						!stale.contains(id) && !s.complete && s.offset == offset && s.text == text
					});
					if reused {
						self.order.push(old_tail.remove(0));
					} else {
						let id = self.insert_sentence(offset, text, false);
						summary.added.push(id);
					}
					break;
				}
				Next::Command(n) => {
					let text: String = suffix.chars().take(n).collect();
					let consumed = text.len();

					if offset >= resync_after {
						let resync = old_tail.iter().position(|id| {
							let s = &self.arena[id];
							!stale.contains(id)
								&& s.complete && s.offset == offset
								&& s.text == text
						});
						if let Some(at) = resync {
							// The surviving tail is byte-identical from
							// here on; splice it back unlexed.
							let tail = old_tail.split_off(at);
							self.order.extend(tail);
							break;
						}
					}

					let id = self.insert_sentence(offset, text, true);
					summary.added.push(id);
					offset += n;
					byte += consumed;
				}
			}
		}

		for id in old_tail {
			self.arena.remove(&id);
			summary.removed.push(id);
		}
		// Sentences consumed by the re-lex may have been re-created with
		// identical text; those count as removed+added, not reused.
		self.relink();
	}

	fn insert_sentence(&mut self, offset: usize, text: String, complete: bool) -> SentenceId {
		let id = SentenceId(self.next_id);
		self.next_id += 1;
		let scope = complete.then(|| parse_scope(&text, offset)).flatten();
		self.arena.insert(
			id,
			Sentence {
				id,
				offset,
				text,
				prev: None,
				next: None,
				complete,
				scope,
			},
		);
		self.order.push(id);
		id
	}

	fn relink(&mut self) {
		let order = self.order.clone();
		for (idx, id) in order.iter().enumerate() {
			let prev = idx.checked_sub(1).map(|i| order[i]);
			let next = order.get(idx + 1).copied();
			let sentence = self.arena.get_mut(id).expect("arena entry");
			sentence.prev = prev;
			sentence.next = next;
		}
	}
}

fn char_to_byte(text: &str, char_offset: usize) -> usize {
	text.char_indices()
		.nth(char_offset)
		.map_or(text.len(), |(b, _)| b)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn texts(collection: &SentenceCollection) -> Vec<&str> {
		collection
			.order
			.iter()
			.map(|id| collection.arena[id].text.as_str())
			.collect()
	}

	fn replace(range: Range<usize>, text: &str) -> TextChange {
		TextChange {
			range,
			text: text.to_owned(),
		}
	}

	#[test]
	fn test_initial_segmentation_tiles_the_document() {
		let doc = "Check nat. Check bool.\n(* note *) Qed.";
		let collection = SentenceCollection::new(doc, 1);
		assert_eq!(
			texts(&collection),
			vec!["Check nat.", " Check bool.", "\n(* note *) Qed."]
		);
		assert_eq!(collection.sentence_text(), doc);
	}

	#[test]
	fn test_trailing_incomplete_region_is_a_sentence() {
		let collection = SentenceCollection::new("Check nat. Definition x :=", 1);
		let sentences = collection.sentences();
		assert_eq!(sentences.len(), 2);
		assert!(sentences[0].complete);
		assert!(!sentences[1].complete);
		assert_eq!(sentences[1].text, " Definition x :=");
	}

	#[test]
	fn test_empty_document() {
		let collection = SentenceCollection::new("", 1);
		assert!(collection.is_empty());
		assert_eq!(collection.sentence_at(0), None);
	}

	#[test]
	fn test_sentence_at_and_prefix() {
		let collection = SentenceCollection::new("One. Two. Three.", 1);
		assert_eq!(collection.sentence_at(0).expect("hit").text, "One.");
		assert_eq!(collection.sentence_at(5).expect("hit").text, " Two.");
		assert_eq!(collection.sentence_at(100), None);
		// Offset 6 is inside " Two.": prefix covers "One." and " Two.".
		assert_eq!(collection.sentence_prefix_at(6).len(), 2);
		assert_eq!(collection.sentence_prefix_at(0).len(), 0);
	}

	#[test]
	fn test_stale_version_is_rejected() {
		let mut collection = SentenceCollection::new("Check nat.", 3);
		let err = collection
			.apply_changes(3, &[replace(0..0, "X")])
			.expect_err("stale");
		assert_eq!(
			err,
			ApplyError::StaleVersion {
				current: 3,
				received: 3
			}
		);
	}

	#[test]
	fn test_out_of_bounds_range_is_rejected() {
		let mut collection = SentenceCollection::new("Check nat.", 1);
		let err = collection
			.apply_changes(2, &[replace(5..99, "")])
			.expect_err("bad range");
		assert!(matches!(err, ApplyError::InvalidRange { .. }));
	}

	#[test]
	fn test_interior_edit_patches_in_place() {
		let mut collection = SentenceCollection::new("Check nat. Check bool.", 1);
		let before: Vec<SentenceId> = collection.order.clone();
		let summary = collection
			.apply_changes(2, &[replace(6..9, "bool")])
			.expect("apply");
		assert_eq!(summary.patched, vec![before[0]]);
		assert!(summary.added.is_empty() && summary.removed.is_empty());
		assert_eq!(texts(&collection), vec!["Check bool.", " Check bool."]);
		// Identity of the untouched sentence survives, offset shifted.
		assert_eq!(collection.order[1], before[1]);
		assert_eq!(collection.arena[&before[1]].offset, 11);
		assert_eq!(collection.sentence_text(), collection.get_text());
	}

	#[test]
	fn test_edit_breaking_terminator_resegments() {
		let mut collection = SentenceCollection::new("Check nat. Check bool.", 1);
		let before = collection.order.clone();
		// Delete the first period: both sentences merge into one.
		let summary = collection
			.apply_changes(2, &[replace(9..10, "")])
			.expect("apply");
		assert_eq!(texts(&collection), vec!["Check nat Check bool."]);
		assert!(summary.removed.contains(&before[0]));
		assert!(summary.removed.contains(&before[1]));
		assert_eq!(summary.added.len(), 1);
	}

	#[test]
	fn test_identity_preserved_past_the_edit() {
		let mut collection = SentenceCollection::new("One. Two. Three. Four.", 1);
		let before = collection.order.clone();
		// Split the first sentence in two; the tail must resync.
		let summary = collection
			.apply_changes(2, &[replace(0..4, "Uno. Extra.")])
			.expect("apply");
		assert_eq!(
			texts(&collection),
			vec!["Uno.", " Extra.", " Two.", " Three.", " Four."]
		);
		// The untouched tail keeps its ids at shifted offsets.
		assert_eq!(&collection.order[2..], &before[1..]);
		assert_eq!(collection.arena[&before[1]].offset, 11);
		assert_eq!(summary.removed, vec![before[0]]);
		assert_eq!(summary.added.len(), 2);
		assert_eq!(collection.sentence_text(), collection.get_text());
	}

	#[test]
	fn test_deleting_everything_empties_the_collection() {
		let mut collection = SentenceCollection::new("One. Two.", 1);
		collection
			.apply_changes(2, &[replace(0..9, "")])
			.expect("apply");
		assert!(collection.is_empty());
		assert_eq!(collection.get_text(), "");
	}

	#[test]
	fn test_appending_to_incomplete_tail_completes_it() {
		let mut collection = SentenceCollection::new("Check nat", 1);
		assert!(!collection.sentences()[0].complete);
		collection
			.apply_changes(2, &[replace(9..9, ".")])
			.expect("apply");
		let sentences = collection.sentences();
		assert_eq!(sentences.len(), 1);
		assert!(sentences[0].complete);
		assert_eq!(sentences[0].text, "Check nat.");
	}

	#[test]
	fn test_batch_equals_sequential_application() {
		let doc = "One. Two. Three. Four.";
		let edits = [replace(17..21, "Quux"), replace(5..8, "Dos")];

		let mut batched = SentenceCollection::new(doc, 1);
		batched.apply_changes(2, &edits).expect("batch");

		let mut sequential = SentenceCollection::new(doc, 1);
		// Descending start order keeps each edit's coordinates valid.
		sequential
			.apply_changes(2, &[edits[0].clone()])
			.expect("first");
		sequential
			.apply_changes(3, &[edits[1].clone()])
			.expect("second");

		assert_eq!(batched.get_text(), sequential.get_text());
		assert_eq!(texts(&batched), texts(&sequential));
		assert_eq!(batched.sentence_text(), batched.get_text());
	}

	#[test]
	fn test_linked_order_is_consistent() {
		let mut collection = SentenceCollection::new("One. Two. Three.", 1);
		collection
			.apply_changes(2, &[replace(4..9, " Dos x.")])
			.expect("apply");
		let sentences = collection.sentences();
		assert_eq!(sentences[0].prev, None);
		for pair in sentences.windows(2) {
			assert_eq!(pair[0].next, Some(pair[1].id));
			assert_eq!(pair[1].prev, Some(pair[0].id));
		}
		assert_eq!(sentences.last().expect("tail").next, None);
	}

	#[test]
	fn test_prepending_shifts_without_destroying_tail() {
		let mut collection = SentenceCollection::new("Two. Three.", 1);
		let before = collection.order.clone();
		let summary = collection
			.apply_changes(2, &[replace(0..0, "One. ")])
			.expect("apply");
		assert_eq!(texts(&collection)[0], "One.");
		assert!(!summary.added.is_empty());
		// "Three." is untouched and keeps its id.
		assert!(collection.order.contains(&before[1]));
	}

	#[test]
	fn test_scope_attached_to_defining_sentence() {
		let collection = SentenceCollection::new("Definition d := 1. intros.", 1);
		let sentences = collection.sentences();
		assert!(sentences[0].scope.is_some());
		assert!(sentences[1].scope.is_none());
	}

	#[test]
	fn test_lookup_symbol_through_collection() {
		let collection =
			SentenceCollection::new("Section S. Variable x : nat. Check x. End S.", 1);
		let query_site = collection.sentences()[2].id;
		let hits = collection.lookup_symbol(query_site, &["x".to_owned()], ScopeFlags::ALL);
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].source, collection.sentences()[1].id);

		let after_end = collection.sentences()[3].id;
		let hits = collection.lookup_symbol(after_end, &["x".to_owned()], ScopeFlags::ALL);
		assert!(hits.is_empty());
	}
}
