//! In-memory stand-ins for the page: a tiny DOM, a hand-answered transport and manual timers.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core::{
	cell::{Cell, RefCell},
	time::Duration,
};
use futures::{
	channel::oneshot,
	executor::LocalPool,
	future::{FutureExt, LocalBoxFuture},
};
use overview_dom::{
	cache::{CacheHost, CacheMonitor, MonitorState, RequestCache},
	config::CacheConfig,
	node::{DomNode, Handler, SLOT_ATTRIBUTE},
	report::{ErrorReport, ErrorSink},
	timer::{Clock, Scheduler, TimerHandle},
	transport::{Request, Response, Transport, TransportError},
};
use serde_json::Value;
use std::{
	collections::BTreeMap,
	rc::{Rc, Weak},
};

pub fn init_logging() {
	let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}

// ---------------------------------------------------------------------------------------------------------------------
// DOM

const VOID_ELEMENTS: &[&str] = &["AREA", "BR", "COL", "HR", "IMG", "INPUT", "LINK", "META"];

#[derive(Default)]
struct Document {
	next_node: Cell<u64>,
	next_listener: Cell<u64>,
	focused: Cell<Option<u64>>,
}

enum Child {
	Text(String),
	Element(MockNode),
}

struct NodeData {
	id: u64,
	tag: String,
	attributes: Vec<(String, String)>,
	children: Vec<Child>,
	value: String,
	checked: bool,
	listeners: Vec<(u64, String, Handler)>,
	content_writes: usize,
	value_writes: usize,
}

/// A DOM node handle. Markup is reparsed on every `set_content`, so nodes inside it are replaced like in a browser.
#[derive(Clone)]
pub struct MockNode {
	data: Rc<RefCell<NodeData>>,
	document: Rc<Document>,
}

impl core::fmt::Debug for MockNode {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "<{}>{}", self.data.borrow().tag, self.content())
	}
}

impl MockNode {
	/// A detached `<div>` in a fresh document, standing in for the page's content area.
	pub fn root() -> Self {
		init_logging();
		Self::element(&Rc::new(Document::default()), "DIV", Vec::new())
	}

	fn element(document: &Rc<Document>, tag: &str, attributes: Vec<(String, String)>) -> Self {
		let id = document.next_node.get();
		document.next_node.set(id + 1);
		Self {
			data: Rc::new(RefCell::new(NodeData {
				id,
				tag: tag.to_ascii_uppercase(),
				attributes,
				children: Vec::new(),
				value: String::new(),
				checked: false,
				listeners: Vec::new(),
				content_writes: 0,
				value_writes: 0,
			})),
			document: Rc::clone(document),
		}
	}

	pub fn same_node(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.data, &other.data)
	}

	/// How often this node's content was replaced.
	pub fn content_writes(&self) -> usize {
		self.data.borrow().content_writes
	}

	/// How often this node's form value was assigned.
	pub fn value_writes(&self) -> usize {
		self.data.borrow().value_writes
	}

	pub fn has_class(&self, class: &str) -> bool {
		self.attribute("class").map_or(false, |classes| classes.split_whitespace().any(|c| c == class))
	}

	pub fn is_disabled(&self) -> bool {
		self.attribute("disabled").is_some()
	}

	pub fn is_focused(&self) -> bool {
		self.document.focused.get() == Some(self.data.borrow().id)
	}

	pub fn listener_count(&self, event: &str) -> usize {
		self.data.borrow().listeners.iter().filter(|(_, name, _)| name == event).count()
	}

	pub fn fire(&self, event: &str) {
		let handlers: Vec<Handler> = self.data.borrow().listeners.iter().filter(|(_, name, _)| name == event).map(|(_, _, handler)| Rc::clone(handler)).collect();
		for handler in handlers {
			handler()
		}
	}

	/// Types `text` into an input or text area.
	pub fn user_input(&self, text: &str) {
		self.data.borrow_mut().value = text.to_owned();
		self.fire("input");
	}

	/// Picks an option of a select.
	pub fn user_select(&self, value: &str) {
		self.select_option(value);
		self.fire("change");
	}

	pub fn user_check(&self, checked: bool) {
		self.data.borrow_mut().checked = checked;
		self.fire("change");
	}

	/// Option values of a select, in order.
	pub fn options(&self) -> Vec<String> {
		let mut options = Vec::new();
		self.walk(&mut |node| {
			if node.data.borrow().tag == "OPTION" {
				options.push(node.option_value());
			}
		});
		options
	}

	fn walk(&self, visit: &mut dyn FnMut(&MockNode)) {
		let children: Vec<MockNode> = self
			.data
			.borrow()
			.children
			.iter()
			.filter_map(|child| match child {
				Child::Element(node) => Some(node.clone()),
				Child::Text(_) => None,
			})
			.collect();
		for child in children {
			visit(&child);
			child.walk(visit);
		}
	}

	fn text(&self) -> String {
		self.data
			.borrow()
			.children
			.iter()
			.map(|child| match child {
				Child::Text(text) => text.clone(),
				Child::Element(node) => node.text(),
			})
			.collect()
	}

	/// The inline style, which lives in the `style` attribute so that it survives serialisation.
	fn declarations(&self) -> BTreeMap<String, String> {
		self.attribute("style")
			.unwrap_or_default()
			.split(';')
			.filter_map(|declaration| {
				let (property, value) = declaration.split_once(':')?;
				Some((property.trim().to_owned(), value.trim().to_owned()))
			})
			.collect()
	}

	fn option_value(&self) -> String {
		self.attribute("value").unwrap_or_else(|| self.text())
	}

	/// Initialises form state from markup, like the browser does when parsing.
	fn reset_form_state(&self) {
		let tag = self.data.borrow().tag.clone();
		match tag.as_str() {
			"INPUT" => {
				let value = self.attribute("value").unwrap_or_default();
				let checked = self.attribute("checked").is_some();
				let mut data = self.data.borrow_mut();
				data.value = value;
				data.checked = checked;
			}
			"TEXTAREA" => {
				let text = self.text();
				self.data.borrow_mut().value = text;
			}
			"SELECT" => {
				let mut first = None;
				let mut selected = None;
				self.walk(&mut |node| {
					if node.data.borrow().tag == "OPTION" {
						let value = node.option_value();
						if selected.is_none() && node.attribute("selected").is_some() {
							selected = Some(value.clone());
						}
						first.get_or_insert(value);
					}
				});
				self.data.borrow_mut().value = selected.or(first).unwrap_or_default();
			}
			_ => (),
		}
	}

	fn serialize(&self, out: &mut String) {
		let data = self.data.borrow();
		let tag = data.tag.to_ascii_lowercase();
		out.push('<');
		out.push_str(&tag);
		for (name, value) in &data.attributes {
			out.push_str(&format!(" {}=\"{}\"", name, value.replace('"', "&quot;")));
		}
		out.push('>');
		if VOID_ELEMENTS.contains(&data.tag.as_str()) {
			return;
		}
		for child in &data.children {
			match child {
				Child::Text(text) => out.push_str(text),
				Child::Element(node) => node.serialize(out),
			}
		}
		out.push_str(&format!("</{}>", tag));
	}
}

fn tag_end(rest: &str) -> usize {
	let mut quote = None;
	for (i, c) in rest.char_indices() {
		match (quote, c) {
			(None, '"') | (None, '\'') => quote = Some(c),
			(Some(q), c) if q == c => quote = None,
			(None, '>') => return i,
			_ => (),
		}
	}
	panic!("unterminated tag in {:?}", rest)
}

fn parse_tag(inner: &str) -> (String, Vec<(String, String)>) {
	let inner = inner.trim_end_matches('/');
	let name_end = inner.find(char::is_whitespace).unwrap_or_else(|| inner.len());
	let name = inner[..name_end].to_owned();
	let mut attributes = Vec::new();
	let mut rest = inner[name_end..].trim_start();
	while !rest.is_empty() {
		let key_end = rest.find(|c: char| c == '=' || c.is_whitespace()).unwrap_or_else(|| rest.len());
		let key = rest[..key_end].to_ascii_lowercase();
		rest = rest[key_end..].trim_start();
		let value = if let Some(after) = rest.strip_prefix('=') {
			let after = after.trim_start();
			match after.chars().next() {
				Some(q) if q == '"' || q == '\'' => {
					let end = after[1..].find(q).expect("unterminated attribute value") + 1;
					rest = &after[end + 1..];
					after[1..end].to_owned()
				}
				_ => {
					let end = after.find(char::is_whitespace).unwrap_or_else(|| after.len());
					rest = &after[end..];
					after[..end].to_owned()
				}
			}
		} else {
			String::new()
		};
		attributes.push((key, value));
		rest = rest.trim_start();
	}
	(name, attributes)
}

fn parse(document: &Rc<Document>, html: &str) -> Vec<Child> {
	let mut roots = Vec::new();
	let mut stack: Vec<MockNode> = Vec::new();
	let mut created = Vec::new();
	let mut rest = html;

	fn push(roots: &mut Vec<Child>, stack: &[MockNode], child: Child) {
		match stack.last() {
			Some(parent) => parent.data.borrow_mut().children.push(child),
			None => roots.push(child),
		}
	}

	while !rest.is_empty() {
		if let Some(after) = rest.strip_prefix("</") {
			let end = after.find('>').expect("unterminated end tag");
			let name = after[..end].trim().to_ascii_uppercase();
			while let Some(open) = stack.pop() {
				if open.data.borrow().tag == name {
					break;
				}
			}
			rest = &after[end + 1..];
		} else if rest.starts_with('<') {
			let end = tag_end(rest);
			let inner = &rest[1..end];
			let (name, attributes) = parse_tag(inner);
			let node = MockNode::element(document, &name, attributes);
			push(&mut roots, &stack, Child::Element(node.clone()));
			created.push(node.clone());
			if !inner.ends_with('/') && !VOID_ELEMENTS.contains(&node.data.borrow().tag.as_str()) {
				stack.push(node);
			}
			rest = &rest[end + 1..];
		} else {
			let end = rest.find('<').unwrap_or_else(|| rest.len());
			push(&mut roots, &stack, Child::Text(rest[..end].to_owned()));
			rest = &rest[end..];
		}
	}

	for node in created {
		node.reset_form_state();
	}
	roots
}

/// Unregisters on drop.
pub struct MockListener {
	node: Weak<RefCell<NodeData>>,
	id: u64,
}

impl Drop for MockListener {
	fn drop(&mut self) {
		if let Some(node) = self.node.upgrade() {
			node.borrow_mut().listeners.retain(|(id, _, _)| *id != self.id);
		}
	}
}

impl DomNode for MockNode {
	type Listener = MockListener;

	fn create_buffer(&self) -> Self {
		MockNode::element(&self.document, "DIV", Vec::new())
	}

	fn slots(&self) -> Vec<Self> {
		let mut slots = Vec::new();
		self.walk(&mut |node| {
			if node.attribute(SLOT_ATTRIBUTE).is_some() {
				slots.push(node.clone());
			}
		});
		slots
	}

	fn slot(&self, name: &str) -> Option<Self> {
		self.slots().into_iter().find(|node| node.attribute(SLOT_ATTRIBUTE).as_deref() == Some(name))
	}

	fn tag_name(&self) -> String {
		self.data.borrow().tag.clone()
	}

	fn attribute(&self, name: &str) -> Option<String> {
		self.data.borrow().attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.clone())
	}

	fn set_attribute(&self, name: &str, value: &str) {
		let mut data = self.data.borrow_mut();
		match data.attributes.iter_mut().find(|(key, _)| key == name) {
			Some(attribute) => attribute.1 = value.to_owned(),
			None => data.attributes.push((name.to_owned(), value.to_owned())),
		}
	}

	fn content(&self) -> String {
		let mut out = String::new();
		for child in &self.data.borrow().children {
			match child {
				Child::Text(text) => out.push_str(text),
				Child::Element(node) => node.serialize(&mut out),
			}
		}
		out
	}

	fn set_content(&self, html: &str) {
		let children = parse(&self.document, html);
		{
			let mut data = self.data.borrow_mut();
			data.children = children;
			data.content_writes += 1;
		}
		if self.data.borrow().tag == "SELECT" || self.data.borrow().tag == "TEXTAREA" {
			self.reset_form_state();
		}
	}

	fn style(&self, property: &str) -> String {
		self.declarations().remove(property).unwrap_or_default()
	}

	fn set_style(&self, property: &str, value: &str) {
		let mut declarations = self.declarations();
		declarations.insert(property.to_owned(), value.to_owned());
		let style: Vec<String> = declarations.iter().map(|(property, value)| format!("{}: {};", property, value)).collect();
		self.set_attribute("style", &style.join(" "));
	}

	fn value(&self) -> String {
		self.data.borrow().value.clone()
	}

	fn set_value(&self, value: &str) {
		let mut data = self.data.borrow_mut();
		data.value = value.to_owned();
		data.value_writes += 1;
	}

	fn checked(&self) -> bool {
		self.data.borrow().checked
	}

	fn set_checked(&self, checked: bool) {
		let mut data = self.data.borrow_mut();
		data.checked = checked;
		data.value_writes += 1;
	}

	fn select_option(&self, value: &str) {
		if self.options().iter().any(|option| option == value) {
			let mut data = self.data.borrow_mut();
			data.value = value.to_owned();
			data.value_writes += 1;
		}
	}

	fn set_disabled(&self, disabled: bool) {
		if disabled {
			self.set_attribute("disabled", "");
		} else {
			self.data.borrow_mut().attributes.retain(|(key, _)| key != "disabled");
		}
	}

	fn add_class(&self, class: &str) {
		if !self.has_class(class) {
			let classes = self.attribute("class").unwrap_or_default();
			let classes = if classes.is_empty() { class.to_owned() } else { format!("{} {}", classes, class) };
			self.set_attribute("class", &classes);
		}
	}

	fn remove_class(&self, class: &str) {
		if self.has_class(class) {
			let classes = self.attribute("class").unwrap_or_default();
			let classes: Vec<&str> = classes.split_whitespace().filter(|c| *c != class).collect();
			self.set_attribute("class", &classes.join(" "));
		}
	}

	fn listen(&self, event: &str, handler: Handler) -> MockListener {
		let id = self.document.next_listener.get();
		self.document.next_listener.set(id + 1);
		self.data.borrow_mut().listeners.push((id, event.to_owned(), handler));
		MockListener {
			node: Rc::downgrade(&self.data),
			id,
		}
	}

	fn focus(&self) {
		self.document.focused.set(Some(self.data.borrow().id));
	}
}

/// Templates from a fixed table.
pub fn templates(table: &[(&str, &str)]) -> Rc<dyn overview_dom::TemplateSource> {
	let table: Vec<(String, String)> = table.iter().map(|(id, html)| ((*id).to_owned(), (*html).to_owned())).collect();
	Rc::new(move |id: &str| table.iter().find(|(key, _)| key == id).map(|(_, html)| html.clone()))
}

// ---------------------------------------------------------------------------------------------------------------------
// Transport

type Responder = oneshot::Sender<Result<Response, TransportError>>;

/// Records requests. Each is answered by hand through [`respond`](`MockTransport::respond`).
#[derive(Default)]
pub struct MockTransport {
	requests: RefCell<Vec<(Request, Option<Responder>)>>,
}

impl MockTransport {
	pub fn requests(&self) -> Vec<Request> {
		self.requests.borrow().iter().map(|(request, _)| request.clone()).collect()
	}

	pub fn count(&self) -> usize {
		self.requests.borrow().len()
	}

	pub fn request(&self, index: usize) -> Request {
		self.requests.borrow()[index].0.clone()
	}

	/// Whether request `index` was aborted (its future dropped) before it was answered.
	pub fn aborted(&self, index: usize) -> bool {
		self.requests.borrow()[index].1.as_ref().map_or(false, oneshot::Sender::is_canceled)
	}

	pub fn respond(&self, index: usize, response: Result<Response, TransportError>) {
		let responder = self.requests.borrow_mut()[index].1.take().expect("request already answered");
		let _ = responder.send(response);
	}
}

impl Transport for MockTransport {
	fn fetch(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>> {
		let (sender, receiver) = oneshot::channel();
		self.requests.borrow_mut().push((request, Some(sender)));
		receiver.map(|answer| answer.unwrap_or_else(|_| Err(TransportError::Network("request dropped".to_owned())))).boxed_local()
	}
}

pub fn json(body: &str) -> Response {
	Response::new(200, "OK").with_header("Content-Type", "application/json").with_body(body)
}

pub fn ok(result: &Value) -> Result<Response, TransportError> {
	Ok(json(&serde_json::json!({ "result": result }).to_string()))
}

// ---------------------------------------------------------------------------------------------------------------------
// Timers

enum Callback {
	Interval(Box<dyn FnMut()>),
	Timeout(Box<dyn FnOnce()>),
}

struct Timer {
	id: u64,
	due: u64,
	period: u64,
	callback: Option<Callback>,
}

#[derive(Default)]
struct SchedulerState {
	now: Cell<u64>,
	next_id: Cell<u64>,
	timers: RefCell<Vec<Timer>>,
}

/// Timers that only fire on [`advance`](`ManualScheduler::advance`).
#[derive(Clone, Default)]
pub struct ManualScheduler(Rc<SchedulerState>);

impl ManualScheduler {
	pub fn pending(&self) -> usize {
		self.0.timers.borrow().len()
	}

	/// Moves virtual time forward by `ms`, firing everything that comes due in order.
	pub fn advance(&self, ms: u64) {
		let target = self.0.now.get() + ms;
		loop {
			let next = {
				let mut timers = self.0.timers.borrow_mut();
				let next = timers.iter_mut().filter(|timer| timer.callback.is_some() && timer.due <= target).min_by_key(|timer| (timer.due, timer.id));
				next.map(|timer| (timer.id, timer.due, timer.callback.take()))
			};
			let (id, due, callback) = match next {
				Some((id, due, Some(callback))) => (id, due, callback),
				_ => break,
			};
			self.0.now.set(due);
			match callback {
				Callback::Timeout(fire) => {
					self.0.timers.borrow_mut().retain(|timer| timer.id != id);
					fire();
				}
				Callback::Interval(mut tick) => {
					tick();
					if let Some(timer) = self.0.timers.borrow_mut().iter_mut().find(|timer| timer.id == id) {
						timer.due += timer.period;
						timer.callback = Some(Callback::Interval(tick));
					}
				}
			}
		}
		self.0.now.set(target);
	}

	fn add(&self, delay: Duration, period: u64, callback: Callback) -> TimerHandle {
		let id = self.0.next_id.get();
		self.0.next_id.set(id + 1);
		let delay = delay.as_millis() as u64;
		self.0.timers.borrow_mut().push(Timer {
			id,
			due: self.0.now.get() + delay,
			period,
			callback: Some(callback),
		});
		let state = Rc::downgrade(&self.0);
		TimerHandle::new(move || {
			if let Some(state) = state.upgrade() {
				state.timers.borrow_mut().retain(|timer| timer.id != id);
			}
		})
	}
}

impl Scheduler for ManualScheduler {
	fn interval(&self, period: Duration, tick: Box<dyn FnMut()>) -> TimerHandle {
		self.add(period, period.as_millis() as u64, Callback::Interval(tick))
	}

	fn timeout(&self, delay: Duration, fire: Box<dyn FnOnce()>) -> TimerHandle {
		self.add(delay, 0, Callback::Timeout(fire))
	}
}

#[derive(Clone)]
pub struct ManualClock(Rc<Cell<DateTime<Utc>>>);

impl Default for ManualClock {
	fn default() -> Self {
		Self(Rc::new(Cell::new(Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap())))
	}
}

impl ManualClock {
	pub fn advance(&self, secs: i64) {
		self.0.set(self.0.get() + ChronoDuration::seconds(secs));
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		self.0.get()
	}
}

// ---------------------------------------------------------------------------------------------------------------------
// Sinks

#[derive(Clone, Default)]
pub struct RecordingSink(Rc<RefCell<Vec<ErrorReport>>>);

impl RecordingSink {
	pub fn reports(&self) -> Vec<ErrorReport> {
		self.0.borrow().clone()
	}
}

impl ErrorSink for RecordingSink {
	fn report(&self, report: ErrorReport) {
		self.0.borrow_mut().push(report)
	}
}

#[derive(Default)]
pub struct RecordingMonitor(RefCell<Vec<(String, MonitorState)>>);

impl RecordingMonitor {
	pub fn states(&self, path: &str) -> Vec<MonitorState> {
		self.0.borrow().iter().filter(|(p, _)| p == path).map(|(_, state)| *state).collect()
	}
}

impl CacheMonitor for RecordingMonitor {
	fn changed(&self, path: &str, state: MonitorState) {
		self.0.borrow_mut().push((path.to_owned(), state))
	}
}

// ---------------------------------------------------------------------------------------------------------------------

/// A [`RequestCache`] wired to the mocks above.
pub struct Harness {
	pub pool: LocalPool,
	pub transport: Rc<MockTransport>,
	pub scheduler: ManualScheduler,
	pub clock: ManualClock,
	pub errors: RecordingSink,
	pub monitor: Rc<RecordingMonitor>,
	pub cache: RequestCache,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(CacheConfig::default().with_base_url("/overview"))
	}

	pub fn with_config(config: CacheConfig) -> Self {
		init_logging();
		let pool = LocalPool::new();
		let transport = Rc::new(MockTransport::default());
		let scheduler = ManualScheduler::default();
		let clock = ManualClock::default();
		let errors = RecordingSink::default();
		let monitor = Rc::new(RecordingMonitor::default());
		let cache = RequestCache::new(
			config,
			CacheHost {
				transport: Rc::clone(&transport) as Rc<dyn Transport>,
				spawner: Rc::new(pool.spawner()),
				clock: Rc::new(clock.clone()),
				scheduler: Rc::new(scheduler.clone()),
				errors: Rc::new(errors.clone()),
				monitor: Some(Rc::clone(&monitor) as Rc<dyn CacheMonitor>),
			},
		);
		Self {
			pool,
			transport,
			scheduler,
			clock,
			errors,
			monitor,
			cache,
		}
	}

	/// Polls spawned fetches until nothing can make progress.
	pub fn run(&mut self) {
		self.pool.run_until_stalled();
	}

	/// Answers request `index` and lets the cache process it.
	pub fn respond(&mut self, index: usize, response: Result<Response, TransportError>) {
		self.transport.respond(index, response);
		self.run();
	}

	pub fn clock_now(&self) -> DateTime<Utc> {
		self.clock.now()
	}

	/// Moves both clock and timers forward.
	pub fn advance(&mut self, secs: u64) {
		self.clock.advance(secs as i64);
		self.scheduler.advance(secs * 1000);
		self.run();
	}
}

/// Collects `(complete, data)` pairs handed to cache callbacks.
#[derive(Clone, Default)]
pub struct Calls(pub Rc<RefCell<Vec<(String, bool, Value)>>>);

impl Calls {
	pub fn callback(&self, tag: &str) -> impl FnOnce(bool, Rc<Value>) + 'static {
		let calls = Rc::clone(&self.0);
		let tag = tag.to_owned();
		move |complete, data| calls.borrow_mut().push((tag, complete, (*data).clone()))
	}

	pub fn tags(&self) -> Vec<String> {
		self.0.borrow().iter().map(|(tag, _, _)| tag.clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.0.borrow().len()
	}

	pub fn get(&self, index: usize) -> (String, bool, Value) {
		self.0.borrow()[index].clone()
	}
}
