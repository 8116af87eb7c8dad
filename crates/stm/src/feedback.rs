//! Rate limiting for outward status pushes.
//!
//! Internal state can change far faster than consumers want to redraw.
//! [`FeedbackSync`] decouples the two velocities: submissions within the
//! refractory period coalesce (later payloads replace earlier unsent
//! ones), and a trailing flush guarantees the latest payload is never
//! lost.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Default refractory period between pushes.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_millis(200);

struct SyncState<T> {
	pending: Option<T>,
	last_sent: Option<Instant>,
	timer_armed: bool,
}

/// Coalescing rate limiter over an unbounded channel.
pub struct FeedbackSync<T> {
	period: Duration,
	out: mpsc::UnboundedSender<T>,
	state: Arc<Mutex<SyncState<T>>>,
}

impl<T> Clone for FeedbackSync<T> {
	fn clone(&self) -> Self {
		Self {
			period: self.period,
			out: self.out.clone(),
			state: self.state.clone(),
		}
	}
}

impl<T: Send + 'static> FeedbackSync<T> {
	pub fn new(period: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
		let (out, rx) = mpsc::unbounded_channel();
		(
			Self {
				period,
				out,
				state: Arc::new(Mutex::new(SyncState {
					pending: None,
					last_sent: None,
					timer_armed: false,
				})),
			},
			rx,
		)
	}

	/// Submit a payload, replacing any unsent one.
	///
	/// Sends immediately when the refractory period has elapsed; otherwise
	/// the payload waits for the trailing flush.
	pub fn submit(&self, item: T) {
		let now = Instant::now();
		let mut state = self.state.lock();
		let quiescent = state
			.last_sent
			.is_none_or(|last| now.duration_since(last) >= self.period);
		if quiescent && !state.timer_armed {
			state.last_sent = Some(now);
			drop(state);
			let _ = self.out.send(item);
			return;
		}

		state.pending = Some(item);
		if !state.timer_armed {
			state.timer_armed = true;
			let deadline = state.last_sent.unwrap_or(now) + self.period;
			let shared = self.state.clone();
			let out = self.out.clone();
			tokio::spawn(async move {
				tokio::time::sleep_until(deadline).await;
				let item = {
					let mut state = shared.lock();
					state.timer_armed = false;
					state.last_sent = Some(Instant::now());
					state.pending.take()
				};
				if let Some(item) = item {
					let _ = out.send(item);
				}
			});
		}
	}

	/// Send immediately, discarding any coalesced payload it supersedes.
	pub fn submit_now(&self, item: T) {
		{
			let mut state = self.state.lock();
			state.pending = None;
			state.last_sent = Some(Instant::now());
		}
		let _ = self.out.send(item);
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn test_burst_coalesces_to_first_and_last() {
		let (sync, mut rx) = FeedbackSync::new(Duration::from_millis(200));
		for n in 0..5 {
			sync.submit(n);
		}
		// The first item passes immediately.
		assert_eq!(rx.recv().await, Some(0));
		// The rest coalesce into the trailing flush.
		tokio::time::advance(Duration::from_millis(250)).await;
		assert_eq!(rx.recv().await, Some(4));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_spaced_submissions_pass_through() {
		let (sync, mut rx) = FeedbackSync::new(Duration::from_millis(200));
		sync.submit(1);
		tokio::time::advance(Duration::from_millis(300)).await;
		sync.submit(2);
		assert_eq!(rx.recv().await, Some(1));
		assert_eq!(rx.recv().await, Some(2));
	}

	#[tokio::test(start_paused = true)]
	async fn test_submit_now_bypasses_the_limiter() {
		let (sync, mut rx) = FeedbackSync::new(Duration::from_millis(200));
		sync.submit(1);
		sync.submit(2);
		sync.submit_now(3);
		assert_eq!(rx.recv().await, Some(1));
		assert_eq!(rx.recv().await, Some(3));
		// The coalesced 2 was superseded by the immediate push.
		tokio::time::advance(Duration::from_millis(500)).await;
		assert!(rx.try_recv().is_err());
	}
}
