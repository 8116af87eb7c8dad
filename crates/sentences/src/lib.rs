//! Incremental segmentation of proof-script text into sentences.
//!
//! A sentence is the atomic unit the prover accepts: one command, bullet,
//! or brace, together with the whitespace and comments preceding it.
//! [`SentenceCollection`] keeps the document text and its segmentation in
//! step under batched edits, re-lexing as little as possible and keeping
//! sentence identities stable wherever text and boundaries survive, the
//! property the state machine's common-prefix diff depends on.
//!
//! Sentences that introduce names also carry a [`scopes::ScopeDeclaration`]
//! so qualified identifiers can be resolved backward through the document.

mod collection;
mod lexer;
pub mod scopes;

pub use collection::{
	ChangeSummary, Sentence, SentenceCollection, SentenceId, SymbolInformation, TextChange,
};
pub use lexer::{Next, command_length};

/// A convenient type alias for `Result` with `E` = [`enum@ApplyError`].
pub type Result<T, E = ApplyError> = std::result::Result<T, E>;

/// Why an edit batch was rejected. The collection is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
	/// The batch targets a version at or behind the current one.
	#[error("edit batch targets version {received}, document is at {current}")]
	StaleVersion { current: i32, received: i32 },
	/// An edit range lies outside the document.
	#[error("edit range {start}..{end} exceeds document length {len}")]
	InvalidRange { start: usize, end: usize, len: usize },
}
