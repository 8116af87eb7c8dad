//! Typed vocabulary and streaming codec for the coqtop XML protocol.
//!
//! The prover speaks a framed XML dialect: each logical request is one
//! top-level `<call>` element on the main channel, and each response is one
//! top-level `<value>`, `<feedback>` or `<message>` element on the way back.
//! There is no enclosing root element and frames arrive on a continuous
//! byte stream, so decoding is incremental: [`XmlDecoder`] wraps the stream
//! with a synthetic root and emits one [`ProtocolEvent`] per completed
//! top-level element.
//!
//! Requests are rendered by [`Call::to_frame`]; argument syntax that varies
//! between prover releases is resolved once per session through
//! [`ProtocolVariant`] rather than scattered version checks.

mod call;
mod decoder;
mod values;

pub use call::{Call, OptionValue, ProtocolVariant};
pub use decoder::XmlDecoder;
pub use values::{
	EditId, Feedback, FeedbackContent, FeedbackTarget, Goal, Goals, Location, LtacProfResults,
	LtacProfTactic, Message, MessageLevel, ProtocolEvent, ProtocolValue, RouteId, StateId, Status,
	UnionSide, ValueReturn,
};

/// A convenient type alias for `Result` with `E` = [`enum@DecodeError`].
pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Errors raised while decoding the prover's response stream.
///
/// A decode error is scoped to the frame that produced it: the transport
/// fails the call awaiting that frame but keeps the connection alive.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
	/// The underlying tokenizer rejected the byte stream.
	#[error("malformed XML: {0}")]
	Xml(#[from] quick_xml::Error),
	/// Input/output error on the underlying stream.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// A close tag arrived with no matching open element.
	#[error("malformed XML input stream has too many closing tags")]
	UnexpectedClose,
	/// An element did not have the shape its tag requires.
	#[error("malformed <{tag}> element: {detail}")]
	Malformed {
		/// Tag name of the offending element.
		tag: String,
		/// What was wrong with it.
		detail: String,
	},
	/// The stream ended mid-frame.
	#[error("response stream ended unexpectedly")]
	Eof,
}

impl DecodeError {
	pub(crate) fn malformed(tag: impl Into<String>, detail: impl Into<String>) -> Self {
		DecodeError::Malformed {
			tag: tag.into(),
			detail: detail.into(),
		}
	}
}
