//! Ordered loading of all data a page needs.

use crate::{
	cache::RequestCache,
	config::LoaderConfig,
	timer::{Scheduler, TimerHandle},
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{debug, instrument, trace};

type DataHandler = Box<dyn FnOnce(Rc<Value>)>;

struct DataRequest {
	id: u64,
	rank: i32,
	path: String,
	handler: DataHandler,
	required: bool,
	data: Option<Rc<Value>>,
}

#[derive(Default)]
struct LoaderState {
	requests: Vec<DataRequest>,
	redraw_timer: Option<TimerHandle>,
	complete: bool,
	generation: u64,
	next_id: u64,
}

struct LoaderInner {
	cache: RequestCache,
	scheduler: Rc<dyn Scheduler>,
	config: LoaderConfig,
	redraw: Box<dyn Fn(bool)>,
	state: RefCell<LoaderState>,
}

/// Loads a set of data paths through a [`RequestCache`] and hands the results over in a stable order.
///
/// Results are delivered in `(rank, path)` order: a result is only handed to its handler once every request ranked
/// before it was delivered. When everything is in, `redraw(true)` runs right away. While results are still missing,
/// `redraw(false)` runs after a delay that restarts on every partial completion, so slow paths don't hold back a
/// first drawing of what is there.
#[derive(Clone)]
pub struct Loader(Rc<LoaderInner>);

impl Debug for Loader {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let state = self.0.state.borrow();
		f.debug_struct("Loader")
			.field("pending", &state.requests.len())
			.field("complete", &state.complete)
			.field("redraw_scheduled", &state.redraw_timer.is_some())
			.finish()
	}
}

impl Loader {
	pub fn new(cache: RequestCache, scheduler: Rc<dyn Scheduler>, config: LoaderConfig, redraw: impl Fn(bool) + 'static) -> Self {
		Self(Rc::new(LoaderInner {
			cache,
			scheduler,
			config,
			redraw: Box::new(redraw),
			state: RefCell::default(),
		}))
	}

	/// Queues a request. It's issued by the next [`next`](`Loader::next`).
	pub fn add(&self, rank: i32, path: &str, handler: impl FnOnce(Rc<Value>) + 'static) -> &Self {
		let mut state = self.0.state.borrow_mut();
		let id = state.next_id;
		state.next_id += 1;
		state.requests.push(DataRequest {
			id,
			rank,
			path: path.to_owned(),
			handler: Box::new(handler),
			required: false,
			data: None,
		});
		self
	}

	/// Whether all queued requests were delivered since the last [`reset`](`Loader::reset`).
	#[must_use]
	pub fn is_complete(&self) -> bool {
		self.0.state.borrow().complete
	}

	/// Number of requests not delivered yet.
	#[must_use]
	pub fn pending(&self) -> usize {
		self.0.state.borrow().requests.len()
	}

	/// Issues all queued requests that weren't issued yet and (re)arms the delayed redraw.
	/// Redraws immediately if nothing is pending.
	#[instrument(skip(self))]
	pub fn next(&self) {
		let (issue, generation) = {
			let mut state = self.0.state.borrow_mut();
			state.redraw_timer = None;
			state.complete = state.requests.is_empty();
			if state.complete {
				drop(state);
				return (self.0.redraw)(true);
			}

			let weak = Rc::downgrade(&self.0);
			state.redraw_timer = Some(self.0.scheduler.timeout(
				self.0.config.redraw_delay(),
				Box::new(move || {
					if let Some(inner) = weak.upgrade() {
						trace!("Redrawing with partial data.");
						(inner.redraw)(false);
					}
				}),
			));

			let issue: Vec<(u64, String)> = state
				.requests
				.iter_mut()
				.filter(|request| !request.required)
				.map(|request| {
					request.required = true;
					(request.id, request.path.clone())
				})
				.collect();
			(issue, state.generation)
		};

		debug!(count = issue.len(), "Requiring data.");
		for (id, path) in issue {
			let weak = Rc::downgrade(&self.0);
			self.0.cache.require(&path, move |_, data| finish(&weak, generation, id, data));
		}
	}

	/// Forgets all requests and cancels the delayed redraw. Results of forgotten requests are ignored.
	pub fn reset(&self) {
		let mut state = self.0.state.borrow_mut();
		state.requests.clear();
		state.redraw_timer = None;
		state.complete = false;
		state.generation += 1;
	}
}

fn finish(weak: &Weak<LoaderInner>, generation: u64, id: u64, data: Rc<Value>) {
	let inner = match weak.upgrade() {
		Some(inner) => inner,
		None => return,
	};

	let ready = {
		let mut state = inner.state.borrow_mut();
		if state.generation != generation {
			return trace!(id, "Ignoring data for a reset loader.");
		}
		match state.requests.iter_mut().find(|request| request.id == id) {
			Some(request) => request.data = Some(data),
			None => return,
		}

		state.requests.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.path.cmp(&b.path)));
		let delivered = state.requests.iter().take_while(|request| request.data.is_some()).count();
		state.requests.drain(..delivered).collect::<Vec<_>>()
	};

	for request in ready {
		if let Some(data) = request.data {
			(request.handler)(data);
		}
	}

	let loader = Loader(inner);
	let done = {
		let mut state = loader.0.state.borrow_mut();
		if state.generation != generation || !state.requests.is_empty() {
			false
		} else {
			state.redraw_timer = None;
			state.complete = true;
			true
		}
	};

	if done {
		(loader.0.redraw)(true);
	} else if loader.0.state.borrow().generation == generation {
		loader.next();
	}
}
