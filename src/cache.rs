//! A coalescing, expiring cache of data server responses.

use crate::{
	config::CacheConfig,
	decode::{decode, expires_at},
	report::{classify_response, classify_transport_error, ErrorCategory, ErrorReport, ErrorSink, Failure},
	timer::{Clock, Scheduler, TimerHandle},
	transport::{Request, Response, Transport, TransportError},
};
use chrono::{DateTime, Utc};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	mem,
};
use futures::{
	future::{AbortHandle, Abortable},
	task::{LocalSpawn, LocalSpawnExt},
};
use hashbrown::HashMap;
use serde_json::Value;
use std::{
	collections::VecDeque,
	rc::{Rc, Weak},
};
use tracing::{debug, error, info, instrument, trace, warn};

/// Callback waiting for a path. Receives whether *all* known paths are loaded, and the path's data.
pub type Callback = Box<dyn FnOnce(bool, Rc<Value>)>;

/// How much an entry can be trusted. Ordered from least to most valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Validity {
	/// Must be downloaded again, bypassing any caches.
	ForceReload,
	/// Must be fetched again, but a conditional request may confirm the cached data.
	Invalid,
	Valid,
}

/// Per-path state shown by a [`CacheMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
	Idle,
	Pending,
	Valid,
	/// The server answered, but not with something usable.
	Invalid,
	/// Processing the answer failed.
	Error,
}

/// Observes per-path state changes, for example for a debug sidebar.
pub trait CacheMonitor {
	fn changed(&self, path: &str, state: MonitorState);
}

/// Everything the cache needs from its environment.
pub struct CacheHost {
	pub transport: Rc<dyn Transport>,
	pub spawner: Rc<dyn LocalSpawn>,
	pub clock: Rc<dyn Clock>,
	pub scheduler: Rc<dyn Scheduler>,
	pub errors: Rc<dyn ErrorSink>,
	pub monitor: Option<Rc<dyn CacheMonitor>>,
}

/// Read-only view of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
	pub path: String,
	pub validity: Validity,
	pub expires_at: Option<DateTime<Utc>>,
	pub data: Option<Rc<Value>>,
	pub etag: Option<String>,
	pub queued_callbacks: usize,
	pub in_flight: bool,
}

struct CacheEntry {
	validity: Validity,
	/// [`None`] while a fetch is running or before the first one.
	expires_at: Option<DateTime<Utc>>,
	data: Option<Rc<Value>>,
	etag: Option<String>,
	callbacks: VecDeque<Callback>,
}

impl CacheEntry {
	fn new() -> Self {
		Self {
			validity: Validity::Invalid,
			expires_at: None,
			data: None,
			etag: None,
			callbacks: VecDeque::new(),
		}
	}
}

struct InFlight {
	id: u64,
	abort: AbortHandle,
}

#[derive(Default)]
struct CacheState {
	entries: HashMap<String, CacheEntry>,
	in_flight: HashMap<String, InFlight>,
	complete: bool,
	next_fetch_id: u64,
	/// Bumped by every [`RequestCache::cancel`], which ends callback delivery in progress.
	cancellations: u64,
}

impl CacheState {
	fn entry(&mut self, path: &str) -> (&mut CacheEntry, bool) {
		let created = !self.entries.contains_key(path);
		(self.entries.entry(path.to_owned()).or_insert_with(CacheEntry::new), created)
	}

	fn recompute_complete(&mut self) {
		let in_flight = &self.in_flight;
		self.complete = self.entries.iter().all(|(path, entry)| entry.validity == Validity::Valid && !in_flight.contains_key(path));
	}

	/// Aborts every running fetch. Returns how many there were.
	fn abort_all(&mut self) -> usize {
		let count = self.in_flight.len();
		for (path, in_flight) in self.in_flight.drain() {
			trace!(path = %path, "Aborting fetch.");
			in_flight.abort.abort();
		}
		count
	}

	fn force_reload_all(&mut self) {
		for entry in self.entries.values_mut() {
			entry.validity = Validity::ForceReload;
		}
	}
}

struct Shared {
	config: CacheConfig,
	host: CacheHost,
	state: RefCell<CacheState>,
	purge_timer: RefCell<Option<TimerHandle>>,
}

/// The single gateway between views and the data server.
///
/// Concurrent [`require`](`RequestCache::require`)s of one path share a single fetch, loaded data is served from memory
/// until it expires, and every failure is reported through the [`ErrorSink`] instead of being returned.
///
/// This is a cheap handle: clones share the same cache.
#[derive(Clone)]
pub struct RequestCache(Rc<Shared>);

impl Debug for RequestCache {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let state = self.0.state.borrow();
		f.debug_struct("RequestCache")
			.field("base_url", &self.0.config.base_url)
			.field("entries", &state.entries.len())
			.field("in_flight", &state.in_flight.len())
			.field("complete", &state.complete)
			.finish()
	}
}

/// Raises an error report that points at the call site.
macro_rules! report {
	($cache:expr, $failure:expr) => {
		$cache.report(file!(), line!(), $failure)
	};
}

impl RequestCache {
	/// Creates the cache and starts its periodic purge of expired entries.
	#[must_use]
	pub fn new(config: CacheConfig, host: CacheHost) -> Self {
		let period = config.purge_interval();
		let shared = Rc::new(Shared {
			config,
			host,
			state: RefCell::default(),
			purge_timer: RefCell::new(None),
		});

		let weak = Rc::downgrade(&shared);
		let timer = shared.host.scheduler.interval(
			period,
			Box::new(move || {
				if let Some(shared) = weak.upgrade() {
					RequestCache(shared).purge_expired();
				}
			}),
		);
		*shared.purge_timer.borrow_mut() = Some(timer);
		Self(shared)
	}

	#[must_use]
	pub fn config(&self) -> &CacheConfig {
		&self.0.config
	}

	/// Whether every known path is loaded and nothing is in flight.
	#[must_use]
	pub fn is_complete(&self) -> bool {
		self.0.state.borrow().complete
	}

	/// A snapshot of the entry for `path`.
	#[must_use]
	pub fn get(&self, path: &str) -> Option<EntrySnapshot> {
		let state = self.0.state.borrow();
		state.entries.get(path).map(|entry| EntrySnapshot {
			path: path.to_owned(),
			validity: entry.validity,
			expires_at: entry.expires_at,
			data: entry.data.clone(),
			etag: entry.etag.clone(),
			queued_callbacks: entry.callbacks.len(),
			in_flight: state.in_flight.contains_key(path),
		})
	}

	/// Ensures `path` is loaded, then calls `callback` with the completeness flag and the data.
	///
	/// Valid data is handed over immediately. Otherwise `callback` is queued and, unless a fetch for `path` is already
	/// running, a (conditional) fetch is started. Callbacks for one path run in the order they were queued, and a
	/// [`cancel`](`RequestCache::cancel`) from inside one of them discards those still waiting.
	///
	/// # Panics
	///
	/// Panics raised by `callback` are not caught and are not turned into error reports. On wasm they abort the
	/// application, so callbacks must not panic.
	#[instrument(skip(self, callback))]
	pub fn require(&self, path: &str, callback: impl FnOnce(bool, Rc<Value>) + 'static) -> &Self {
		let mut state = self.0.state.borrow_mut();
		let complete = state.complete;
		let (entry, created) = state.entry(path);
		if let (Validity::Valid, Some(data)) = (entry.validity, entry.data.clone()) {
			drop(state);
			trace!("Serving valid data.");
			callback(complete, data);
			return self;
		}

		entry.callbacks.push_back(Box::new(callback));
		let needs_fetch = !state.in_flight.contains_key(path);
		drop(state);

		if created {
			self.notify(path, MonitorState::Idle);
		}
		if needs_fetch {
			self.fetch(path, Validity::Invalid);
		}
		self
	}

	/// Forces each of `paths` to be downloaded again right away, replacing running fetches.
	/// Queued callbacks are kept and served by the new fetch.
	#[instrument(skip(self, paths))]
	pub fn refresh<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> &Self {
		for path in paths {
			let created = self.0.state.borrow_mut().entry(path).1;
			if created {
				self.notify(path, MonitorState::Idle);
			}
			self.fetch(path, Validity::ForceReload);
		}
		self
	}

	/// Marks `paths` as stale without fetching anything. The next [`require`](`RequestCache::require`) fetches them
	/// conditionally. Running fetches are not affected.
	#[instrument(skip(self, paths))]
	pub fn invalidate<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> &Self {
		for path in paths {
			let known = match self.0.state.borrow_mut().entries.get_mut(path) {
				Some(entry) => {
					entry.validity = Validity::Invalid;
					true
				}
				None => false,
			};
			if known {
				self.notify(path, MonitorState::Idle);
			}
		}
		self
	}

	/// Drops all queued callbacks and aborts all running fetches.
	///
	/// This is a benign abort: no error is reported, but if anything was in flight every entry is downloaded again on
	/// next use.
	#[instrument(skip(self))]
	pub fn cancel(&self) {
		let mut state = self.0.state.borrow_mut();
		state.cancellations += 1;
		let dropped: usize = state.entries.values_mut().map(|entry| mem::take(&mut entry.callbacks).len()).sum();
		let aborted = state.abort_all();
		if aborted > 0 {
			state.force_reload_all();
		}
		drop(state);
		debug!(dropped, aborted, "Cancelled pending data requests.");
	}

	/// Removes valid entries that expired and nobody is waiting for.
	#[instrument(skip(self))]
	pub fn purge_expired(&self) {
		let now = self.0.host.clock.now();
		let mut state = self.0.state.borrow_mut();
		let CacheState { entries, in_flight, .. } = &mut *state;
		let before = entries.len();
		entries.retain(|path, entry| {
			let expired = entry.validity == Validity::Valid && entry.expires_at.map_or(false, |expires_at| expires_at < now);
			!(expired && entry.callbacks.is_empty() && !in_flight.contains_key(path.as_str()))
		});
		let purged = before - entries.len();
		drop(state);
		if purged > 0 {
			info!(purged, "Purged expired data.");
		}
	}

	/// Stops the purge timer and cancels all pending work.
	pub fn dispose(&self) {
		self.0.purge_timer.borrow_mut().take();
		self.cancel();
	}

	fn notify(&self, path: &str, state: MonitorState) {
		if let Some(monitor) = &self.0.host.monitor {
			monitor.changed(path, state);
		}
	}

	/// Starts a fetch of `path` after lowering its validity to `target`.
	#[instrument(skip(self))]
	fn fetch(&self, path: &str, target: Validity) {
		let (request, id, registration) = {
			let mut state = self.0.state.borrow_mut();
			state.complete = false;

			if let Some(previous) = state.in_flight.remove(path) {
				debug!(id = previous.id, "Replacing running fetch.");
				previous.abort.abort();
			}

			let id = state.next_fetch_id;
			state.next_fetch_id += 1;

			let (entry, _) = state.entry(path);
			if entry.validity > target {
				entry.validity = target;
			}
			entry.expires_at = None;

			let mut headers = vec![("Accept".to_owned(), "application/json".to_owned())];
			match (entry.validity, &entry.etag, &entry.data) {
				(Validity::ForceReload, _, _) => headers.push(("Cache-Control".to_owned(), "max-age=0, must-revalidate".to_owned())),
				(_, Some(etag), Some(_)) => headers.push(("If-None-Match".to_owned(), etag.clone())),
				_ => (),
			}

			let (abort, registration) = AbortHandle::new_pair();
			state.in_flight.insert(path.to_owned(), InFlight { id, abort });
			let request = Request {
				url: format!("{}/data{}", self.0.config.base_url, path),
				headers,
			};
			(request, id, registration)
		};

		self.notify(path, MonitorState::Pending);
		debug!(id, url = %request.url, "Fetching.");

		let response = Abortable::new(self.0.host.transport.fetch(request), registration);
		let weak: Weak<Shared> = Rc::downgrade(&self.0);
		let owned_path = path.to_owned();
		let spawned = self.0.host.spawner.spawn_local(async move {
			match response.await {
				Ok(outcome) => match weak.upgrade() {
					Some(shared) => RequestCache(shared).settle(&owned_path, id, outcome),
					None => trace!(path = %owned_path, "Cache dropped before the response arrived."),
				},
				Err(_aborted) => trace!(path = %owned_path, id, "Fetch aborted."),
			}
		});

		if let Err(error) = spawned {
			self.0.state.borrow_mut().in_flight.remove(path);
			report!(
				self,
				Failure {
					category: ErrorCategory::Exception,
					message: format!("Could not start loading {}: {}", html_escape::encode_text(path), error),
					error_id: None,
				}
			);
		}
	}

	/// Handles the outcome of fetch `id` of `path`.
	fn settle(&self, path: &str, id: u64, outcome: Result<Response, TransportError>) {
		{
			let mut state = self.0.state.borrow_mut();
			if state.in_flight.get(path).map(|in_flight| in_flight.id) != Some(id) {
				warn!(path, id, "Ignoring the response of a replaced fetch.");
				return;
			}
			state.in_flight.remove(path);
		}

		let response = match outcome {
			Ok(response) => response,
			Err(error) => {
				self.notify(path, MonitorState::Invalid);
				return report!(self, classify_transport_error(&error, path));
			}
		};

		match response.status {
			200 => match decode(&response) {
				Ok(data) => self.complete(path, &response, Some(data)),
				Err(decode_error) => {
					let state = if decode_error.category() == ErrorCategory::Exception { MonitorState::Error } else { MonitorState::Invalid };
					self.notify(path, state);
					if cfg!(feature = "dangerous-logging") {
						error!(path, body = %response.body, "{}", decode_error);
					}
					report!(
						self,
						Failure {
							category: decode_error.category(),
							message: format!("Internal error retrieving '{}': {}", html_escape::encode_text(path), html_escape::encode_text(&decode_error.to_string())),
							error_id: response.header("X-Error-ID").map(str::to_owned),
						}
					)
				}
			},
			304 if self.0.state.borrow().entries.get(path).map_or(false, |entry| entry.data.is_some()) => self.complete(path, &response, None),
			status @ 200..=399 => {
				self.notify(path, MonitorState::Invalid);
				report!(
					self,
					Failure {
						category: ErrorCategory::BadStatus,
						message: format!(
							"Internal error retrieving '{}': success handler called with status code {} != 200 ('{}')",
							html_escape::encode_text(path),
							status,
							html_escape::encode_text(&response.status_text)
						),
						error_id: response.header("X-Error-ID").map(str::to_owned),
					}
				)
			}
			_ => {
				self.notify(path, MonitorState::Invalid);
				report!(self, classify_response(&response, path))
			}
		}
	}

	/// Marks `path` valid (replacing its data if `data` is [`Some`]) and runs its queued callbacks.
	fn complete(&self, path: &str, response: &Response, data: Option<Value>) {
		let now = self.0.host.clock.now();
		let (complete, data, queued, cancellations) = {
			let mut state = self.0.state.borrow_mut();
			let (entry, _) = state.entry(path);
			let data = match data.map(Rc::new).or_else(|| entry.data.clone()) {
				Some(data) => data,
				None => {
					error!(path, "Completed without data.");
					entry.validity = Validity::ForceReload;
					return;
				}
			};
			entry.data = Some(Rc::clone(&data));
			entry.expires_at = Some(expires_at(response, now, self.0.config.default_max_age_secs));
			if let Some(etag) = response.header("ETag") {
				entry.etag = Some(etag.to_owned());
			}
			entry.validity = Validity::Valid;
			let queued = entry.callbacks.len();
			state.recompute_complete();
			(state.complete, data, queued, state.cancellations)
		};

		self.notify(path, MonitorState::Valid);
		debug!(path, complete, callbacks = queued, "Loaded.");

		// One at a time without holding the borrow, so that a callback can cancel the rest.
		for _ in 0..queued {
			let callback = {
				let mut state = self.0.state.borrow_mut();
				if state.cancellations != cancellations {
					trace!(path, "Delivery cancelled.");
					break;
				}
				match state.entries.get_mut(path).and_then(|entry| entry.callbacks.pop_front()) {
					Some(callback) => callback,
					None => break,
				}
			};
			callback(complete, Rc::clone(&data));
		}
	}

	/// Aborts everything, marks every entry for forced reload and hands `failure` to the error sink.
	fn report(&self, file: &'static str, line: u32, failure: Failure) {
		{
			let mut state = self.0.state.borrow_mut();
			state.abort_all();
			state.force_reload_all();
			state.complete = false;
		}

		let category = failure.category;
		let message = failure.into_message();
		error!(%category, "{}", message);
		self.0.host.errors.report(ErrorReport {
			timeout: self.0.config.error_timeout(),
			file,
			line,
			category,
			message,
			show: true,
		});
	}
}
