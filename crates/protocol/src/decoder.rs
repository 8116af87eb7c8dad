//! Incremental decoder for the prover's continuous response stream.
//!
//! The stream carries a sequence of top-level elements with no enclosing
//! root, so the raw bytes are prefixed with a synthetic `<coqtoproot>` open
//! tag and handed to a generic streaming tokenizer. A stack of open
//! elements accumulates ordered children; closing an element converts it
//! into a typed [`ProtocolValue`], and when the stack empties the value is
//! classified and emitted as a [`ProtocolEvent`].
//!
//! The `richpp` tag switches the builder into rich-text mode: child
//! elements become scope nodes, text nodes become plain leaves, and a
//! node with exactly one child collapses to that child directly instead of
//! a one-element sequence. Closing the outermost rich element attaches the
//! built [`AnnotatedText`] to the enclosing generic element and resumes
//! ordinary decoding.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use quick_xml::Reader;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, BytesText, Event};
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use vernac_text::{AnnotatedText, ScopedText};

use crate::values::{self, Element, ProtocolEvent};
use crate::{DecodeError, Result};

const SYNTHETIC_ROOT: &str = "coqtoproot";

/// An in-progress rich-text node.
struct RichFrame {
	scope: String,
	attributes: BTreeMap<String, String>,
	children: Vec<AnnotatedText>,
}

impl RichFrame {
	fn finish(self) -> AnnotatedText {
		let mut body = match self.children.len() {
			0 => AnnotatedText::empty(),
			// A single child collapses directly, avoiding spurious
			// one-element sequences.
			1 => self.children.into_iter().next().unwrap(),
			_ => AnnotatedText::Seq(self.children),
		};
		if self.scope.is_empty() && self.attributes.is_empty() {
			body = body.normalized();
			return body;
		}
		AnnotatedText::Scoped(Box::new(ScopedText {
			scope: self.scope,
			attributes: self.attributes,
			text: body,
		}))
	}
}

/// Streaming decoder turning a framed byte stream into [`ProtocolEvent`]s.
///
/// Byte-stream chunking never affects the decoded values: feeding a frame
/// in many small writes yields the same events as one large write.
pub struct XmlDecoder<R> {
	reader: Reader<BufReader<WithSyntheticRoot<R>>>,
	buf: Vec<u8>,
	stack: Vec<Element>,
	rich: Vec<RichFrame>,
}

impl<R: AsyncRead + Unpin> XmlDecoder<R> {
	/// Wrap a raw response stream.
	pub fn new(inner: R) -> Self {
		let mut reader = Reader::from_reader(BufReader::new(WithSyntheticRoot {
			prefix: format!("<{SYNTHETIC_ROOT}>").into_bytes(),
			pos: 0,
			inner,
		}));
		let config = reader.config_mut();
		config.expand_empty_elements = true;
		config.check_end_names = false;
		Self {
			reader,
			buf: Vec::new(),
			stack: Vec::new(),
			rich: Vec::new(),
		}
	}

	/// Drop any partially accumulated frame.
	///
	/// After a malformed-frame error the element stack may hold the broken
	/// frame's remains; callers that keep the connection alive reset before
	/// reading on.
	pub fn reset(&mut self) {
		self.stack.clear();
		self.rich.clear();
	}

	/// Decode until the next complete top-level element.
	///
	/// Returns `Ok(None)` on a clean end of stream (no frame in progress).
	pub async fn next_event(&mut self) -> Result<Option<ProtocolEvent>> {
		loop {
			self.buf.clear();
			// Detach the event from the read buffer so the dispatch below can
			// borrow `self` again.
			let event = self
				.reader
				.read_event_into_async(&mut self.buf)
				.await?
				.into_owned();
			match event {
				Event::Start(start) => self.on_open(&start)?,
				Event::End(end) => {
					let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
					if let Some(event) = self.on_close(&name)? {
						return Ok(Some(event));
					}
				}
				Event::Text(text) => self.on_text(&text),
				Event::CData(data) => {
					let raw = String::from_utf8_lossy(data.as_ref()).into_owned();
					self.push_text(raw);
				}
				Event::Eof => {
					if self.stack.is_empty() && self.rich.is_empty() {
						return Ok(None);
					}
					return Err(DecodeError::Eof);
				}
				// Prolog and markup noise carry no protocol content.
				Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
				_ => {}
			}
		}
	}

	fn on_open(&mut self, start: &BytesStart<'_>) -> Result<()> {
		let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
		if name == SYNTHETIC_ROOT {
			return Ok(());
		}
		let attrs = decode_attrs(start)?;
		if !self.rich.is_empty() {
			self.rich.push(RichFrame {
				scope: name,
				attributes: attrs,
				children: Vec::new(),
			});
		} else if name == "richpp" {
			self.rich.push(RichFrame {
				scope: String::new(),
				attributes: attrs,
				children: Vec::new(),
			});
		} else {
			self.stack.push(Element {
				name,
				attrs,
				..Element::default()
			});
		}
		Ok(())
	}

	fn on_close(&mut self, name: &str) -> Result<Option<ProtocolEvent>> {
		if name == SYNTHETIC_ROOT {
			return Err(DecodeError::UnexpectedClose);
		}
		if let Some(frame) = self.rich.pop() {
			let value = frame.finish();
			if let Some(parent) = self.rich.last_mut() {
				parent.children.push(value);
			} else {
				// Leaving the outermost rich element: attach the built
				// text to the enclosing generic element.
				let Some(parent) = self.stack.last_mut() else {
					return Err(DecodeError::UnexpectedClose);
				};
				parent.children.push(crate::ProtocolValue::Richpp(value));
			}
			return Ok(None);
		}
		let Some(element) = self.stack.pop() else {
			return Err(DecodeError::UnexpectedClose);
		};
		let tag = element.name.clone();
		let value = values::convert(element)?;
		match self.stack.last_mut() {
			Some(parent) => {
				parent.children.push(value);
				Ok(None)
			}
			None => values::classify(&tag, value).map(Some),
		}
	}

	fn on_text(&mut self, text: &BytesText<'_>) {
		let decoded = match text.unescape_with(resolve_entity) {
			Ok(s) => s.into_owned(),
			// Lenient fallback: keep the raw bytes rather than failing the
			// frame on an exotic entity.
			Err(_) => String::from_utf8_lossy(text.as_ref()).into_owned(),
		};
		self.push_text(decoded);
	}

	fn push_text(&mut self, text: String) {
		if let Some(frame) = self.rich.last_mut() {
			frame.children.push(AnnotatedText::Plain(text));
		} else if let Some(top) = self.stack.last_mut() {
			top.text.push_str(&text);
		}
		// Text between top-level frames is inter-frame whitespace.
	}
}

fn resolve_entity(entity: &str) -> Option<&'static str> {
	match entity {
		"nbsp" => Some("\u{a0}"),
		_ => None,
	}
}

fn decode_attrs(start: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
	let mut attrs = BTreeMap::new();
	for attr in start.attributes().with_checks(false) {
		let Attribute { key, value } = attr.map_err(quick_xml::Error::from)?;
		let key = String::from_utf8_lossy(key.as_ref()).into_owned();
		let value = match quick_xml::escape::unescape(&String::from_utf8_lossy(&value)) {
			Ok(v) => v.into_owned(),
			Err(_) => String::from_utf8_lossy(&value).into_owned(),
		};
		attrs.insert(key, value);
	}
	Ok(attrs)
}

/// Serves a synthetic root open tag ahead of the wrapped stream so the
/// tokenizer sees one well-formed document.
struct WithSyntheticRoot<R> {
	prefix: Vec<u8>,
	pos: usize,
	inner: R,
}

impl<R: AsyncRead + Unpin> AsyncRead for WithSyntheticRoot<R> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<std::io::Result<()>> {
		let this = self.get_mut();
		if this.pos < this.prefix.len() {
			let n = buf.remaining().min(this.prefix.len() - this.pos);
			buf.put_slice(&this.prefix[this.pos..this.pos + n]);
			this.pos += n;
			return Poll::Ready(Ok(()));
		}
		Pin::new(&mut this.inner).poll_read(cx, buf)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tokio::io::AsyncWriteExt;

	use super::*;
	use crate::values::{
		FeedbackContent, FeedbackTarget, MessageLevel, ProtocolValue, StateId, ValueReturn,
	};

	async fn decode_all(input: &str) -> Vec<ProtocolEvent> {
		let mut decoder = XmlDecoder::new(input.as_bytes());
		let mut events = Vec::new();
		while let Some(event) = decoder.next_event().await.expect("decode") {
			events.push(event);
		}
		events
	}

	#[tokio::test]
	async fn test_good_value_with_state_id() {
		let events = decode_all(r#"<value val="good"><state_id val="2"/></value>"#).await;
		assert_eq!(
			events,
			vec![ProtocolEvent::Value(ValueReturn::Good(ProtocolValue::StateId(StateId(2))))]
		);
	}

	#[tokio::test]
	async fn test_fail_value_carries_location_and_message() {
		let events = decode_all(
			r#"<value val="fail" loc_s="3" loc_e="8"><state_id val="1"/><richpp>The term has type <constr.type>bool</constr.type></richpp></value>"#,
		)
		.await;
		let [ProtocolEvent::Value(ValueReturn::Fail {
			state_id,
			location,
			message,
		})] = events.as_slice()
		else {
			panic!("expected one fail value, got {events:?}");
		};
		assert_eq!(*state_id, Some(StateId(1)));
		let location = location.expect("location");
		assert_eq!((location.start, location.stop), (3, 8));
		assert_eq!(message.to_plain_string(), "The term has type bool");
	}

	#[tokio::test]
	async fn test_feedback_processed() {
		let events = decode_all(
			r#"<feedback object="state" route="0"><state_id val="5"/><feedback_content val="processed"/></feedback>"#,
		)
		.await;
		let [ProtocolEvent::Feedback(f)] = events.as_slice() else {
			panic!("expected one feedback, got {events:?}");
		};
		assert_eq!(f.target, FeedbackTarget::State(StateId(5)));
		assert_eq!(f.content, FeedbackContent::Processed);
	}

	#[tokio::test]
	async fn test_feedback_error_message() {
		let events = decode_all(
			r#"<feedback object="state" route="0"><state_id val="7"/><feedback_content val="message"><message><message_level val="error"/><option val="some"><loc start="0" stop="4"/></option><richpp>Oops.</richpp></message></feedback_content></feedback>"#,
		)
		.await;
		let [ProtocolEvent::Feedback(f)] = events.as_slice() else {
			panic!("expected one feedback, got {events:?}");
		};
		let FeedbackContent::Message(msg) = &f.content else {
			panic!("expected message content, got {:?}", f.content);
		};
		assert_eq!(msg.level, MessageLevel::Error);
		assert_eq!(msg.location.map(|l| (l.start, l.stop)), Some((0, 4)));
		assert_eq!(msg.text.to_plain_string(), "Oops.");
	}

	#[tokio::test]
	async fn test_richpp_single_child_collapses() {
		let events =
			decode_all(r#"<value val="good"><richpp><_>plain</_></richpp></value>"#).await;
		let [ProtocolEvent::Value(ValueReturn::Good(ProtocolValue::Richpp(text)))] =
			events.as_slice()
		else {
			panic!("expected rich text value, got {events:?}");
		};
		// The `_` wrapper stays as a scope node; its single text child
		// collapses instead of becoming a one-element sequence.
		let AnnotatedText::Scoped(scoped) = text else {
			panic!("expected scoped node, got {text:?}");
		};
		assert_eq!(scoped.scope, "_");
		assert_eq!(scoped.text, AnnotatedText::Plain("plain".to_owned()));
	}

	#[tokio::test]
	async fn test_goal_response() {
		let frame = r#"<value val="good"><option val="some"><goals><list><goal><string>3</string><list><richpp>n : nat</richpp></list><richpp>n + 0 = n</richpp></goal></list><list/><list/><list/></goals></option></value>"#;
		let events = decode_all(frame).await;
		let [ProtocolEvent::Value(ValueReturn::Good(value))] = events.as_slice() else {
			panic!("expected one value, got {events:?}");
		};
		let goals = value.clone().into_goals().expect("goals");
		assert_eq!(goals.foreground.len(), 1);
		assert_eq!(goals.foreground[0].id, "3");
		assert_eq!(goals.foreground[0].hypotheses[0].to_plain_string(), "n : nat");
		assert_eq!(goals.foreground[0].conclusion.to_plain_string(), "n + 0 = n");
	}

	#[tokio::test]
	async fn test_chunked_and_whole_streams_decode_identically() {
		let frame = r#"<value val="good"><pair><state_id val="9"/><pair><union val="in_l"><unit/></union><string>ok</string></pair></pair></value>"#;
		let whole = decode_all(frame).await;

		let (mut writer, reader) = tokio::io::duplex(16);
		let mut decoder = XmlDecoder::new(reader);
		let bytes = frame.as_bytes().to_vec();
		let write_task = tokio::spawn(async move {
			// Two writes splitting a nested frame mid-element.
			let split = bytes.len() / 2;
			writer.write_all(&bytes[..split]).await.unwrap();
			tokio::task::yield_now().await;
			writer.write_all(&bytes[split..]).await.unwrap();
			writer.shutdown().await.unwrap();
		});
		let mut chunked = Vec::new();
		while let Some(event) = decoder.next_event().await.expect("decode") {
			chunked.push(event);
		}
		write_task.await.unwrap();

		assert_eq!(chunked, whole);
		assert_eq!(chunked.len(), 1);
	}

	#[tokio::test]
	async fn test_multiple_frames_emit_in_order() {
		let events = decode_all(concat!(
			r#"<feedback object="state" route="0"><state_id val="2"/><feedback_content val="processingin"><string>master</string></feedback_content></feedback>"#,
			"\n",
			r#"<value val="good"><unit/></value>"#,
		))
		.await;
		assert_eq!(events.len(), 2);
		assert!(matches!(events[0], ProtocolEvent::Feedback(_)));
		assert!(matches!(
			events[1],
			ProtocolEvent::Value(ValueReturn::Good(ProtocolValue::Unit))
		));
	}

	#[tokio::test]
	async fn test_unbalanced_close_is_an_error() {
		let mut decoder = XmlDecoder::new(&b"</value>"[..]);
		let err = decoder.next_event().await.expect_err("must fail");
		assert!(matches!(err, DecodeError::UnexpectedClose | DecodeError::Xml(_)));
	}
}
