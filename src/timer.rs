//! Clock and timer collaborators.

use chrono::{DateTime, Utc};
use core::{
	fmt::{self, Debug, Formatter},
	time::Duration,
};

pub trait Clock {
	fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Cancels its timer when dropped.
pub struct TimerHandle(Option<Box<dyn FnOnce()>>);

impl TimerHandle {
	pub fn new(cancel: impl FnOnce() + 'static) -> Self {
		Self(Some(Box::new(cancel)))
	}

	/// Stops the timer now.
	pub fn cancel(mut self) {
		self.cancel_now()
	}

	fn cancel_now(&mut self) {
		if let Some(cancel) = self.0.take() {
			cancel()
		}
	}
}

impl Drop for TimerHandle {
	fn drop(&mut self) {
		self.cancel_now()
	}
}

impl Debug for TimerHandle {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("TimerHandle").field(&self.0.is_some()).finish()
	}
}

/// Schedules callbacks on the event loop.
pub trait Scheduler {
	/// Calls `tick` every `period` until the handle is dropped.
	fn interval(&self, period: Duration, tick: Box<dyn FnMut()>) -> TimerHandle;

	/// Calls `fire` once after `delay`, unless the handle is dropped first.
	fn timeout(&self, delay: Duration, fire: Box<dyn FnOnce()>) -> TimerHandle;
}
