//! Browser implementations of the page collaborators.

use crate::{
	cache::{CacheHost, CacheMonitor, MonitorState},
	node::{DomNode, Handler, TemplateSource, SLOT_ATTRIBUTE},
	report::ErrorSink,
	timer::{Scheduler, SystemClock, TimerHandle},
	transport::{Request, Response, Transport, TransportError},
};
use core::{cell::RefCell, convert::TryFrom, time::Duration};
use futures::{
	future::{self, FutureExt, LocalBoxFuture},
	task::{LocalFutureObj, LocalSpawn, SpawnError},
};
use hashbrown::HashMap;
use js_sys::{Array, Function, Promise};
use std::rc::Rc;
use tracing::{error, instrument, trace, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue, UnwrapThrowExt};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, Document, EventTarget, Headers, HtmlElement, HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement, RequestInit};

/// Removes its event listener when dropped.
pub struct EventListener {
	target: EventTarget,
	event: String,
	closure: Closure<dyn Fn()>,
}

impl Drop for EventListener {
	fn drop(&mut self) {
		if let Err(error) = self.target.remove_event_listener_with_callback(&self.event, self.closure.as_ref().unchecked_ref()) {
			error!("Failed to remove {:?} listener: {:?}", self.event, error);
		}
	}
}

impl core::fmt::Debug for EventListener {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("EventListener").field("event", &self.event).finish()
	}
}

impl DomNode for HtmlElement {
	type Listener = EventListener;

	fn create_buffer(&self) -> Self {
		self.owner_document()
			.unwrap_throw()
			.create_element("div")
			.unwrap_throw()
			.dyn_into::<HtmlElement>()
			.unwrap_throw()
	}

	fn slots(&self) -> Vec<Self> {
		let list = match self.query_selector_all(&format!("[{}]", SLOT_ATTRIBUTE)) {
			Ok(list) => list,
			Err(error) => {
				error!("Failed to query slots: {:?}", error);
				return Vec::new();
			}
		};
		(0..list.length()).filter_map(|i| list.item(i)).filter_map(|node| node.dyn_into::<HtmlElement>().ok()).collect()
	}

	fn slot(&self, name: &str) -> Option<Self> {
		let selector = format!("[{}=\"{}\"]", SLOT_ATTRIBUTE, name.replace('\\', "\\\\").replace('"', "\\\""));
		match self.query_selector(&selector) {
			Ok(element) => element.and_then(|element| element.dyn_into::<HtmlElement>().ok()),
			Err(error) => {
				error!("Invalid slot selector {:?}: {:?}", selector, error);
				None
			}
		}
	}

	fn tag_name(&self) -> String {
		web_sys::Element::tag_name(self)
	}

	fn attribute(&self, name: &str) -> Option<String> {
		self.get_attribute(name)
	}

	fn set_attribute(&self, name: &str, value: &str) {
		if let Err(error) = web_sys::Element::set_attribute(self, name, value) {
			error!("Failed to set attribute {:?}: {:?}", name, error);
		}
	}

	fn content(&self) -> String {
		self.inner_html()
	}

	fn set_content(&self, html: &str) {
		self.set_inner_html(html)
	}

	fn style(&self, property: &str) -> String {
		HtmlElement::style(self).get_property_value(property).unwrap_or_default()
	}

	fn set_style(&self, property: &str, value: &str) {
		if let Err(error) = HtmlElement::style(self).set_property(property, value) {
			error!("Failed to set style {:?}: {:?}", property, error);
		}
	}

	fn value(&self) -> String {
		if let Some(input) = self.dyn_ref::<HtmlInputElement>() {
			input.value()
		} else if let Some(select) = self.dyn_ref::<HtmlSelectElement>() {
			select.value()
		} else if let Some(text_area) = self.dyn_ref::<HtmlTextAreaElement>() {
			text_area.value()
		} else {
			String::new()
		}
	}

	fn set_value(&self, value: &str) {
		if let Some(input) = self.dyn_ref::<HtmlInputElement>() {
			input.set_value(value)
		} else if let Some(select) = self.dyn_ref::<HtmlSelectElement>() {
			select.set_value(value)
		} else if let Some(text_area) = self.dyn_ref::<HtmlTextAreaElement>() {
			text_area.set_value(value)
		} else {
			warn!("Ignoring value for non-form element <{}>.", self.tag_name());
		}
	}

	fn checked(&self) -> bool {
		self.dyn_ref::<HtmlInputElement>().map_or(false, HtmlInputElement::checked)
	}

	fn set_checked(&self, checked: bool) {
		if let Some(input) = self.dyn_ref::<HtmlInputElement>() {
			input.set_checked(checked)
		}
	}

	fn select_option(&self, value: &str) {
		if let Some(select) = self.dyn_ref::<HtmlSelectElement>() {
			let previous = select.value();
			select.set_value(value);
			if select.value() != value {
				trace!(value, "No such option, keeping the selection.");
				select.set_value(&previous);
			}
		}
	}

	fn set_disabled(&self, disabled: bool) {
		let result = if disabled { web_sys::Element::set_attribute(self, "disabled", "") } else { self.remove_attribute("disabled") };
		if let Err(error) = result {
			error!("Failed to toggle `disabled`: {:?}", error);
		}
	}

	fn add_class(&self, class: &str) {
		if let Err(error) = self.class_list().add_1(class) {
			error!("Failed to add class {:?}: {:?}", class, error);
		}
	}

	fn remove_class(&self, class: &str) {
		if let Err(error) = self.class_list().remove_1(class) {
			error!("Failed to remove class {:?}: {:?}", class, error);
		}
	}

	fn listen(&self, event: &str, handler: Handler) -> EventListener {
		let closure = Closure::wrap(Box::new(move || handler()) as Box<dyn Fn()>);
		if let Err(error) = self.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref()) {
			error!("Failed to add {:?} listener: {:?}", event, error);
		}
		EventListener {
			target: self.clone().into(),
			event: event.to_owned(),
			closure,
		}
	}

	fn focus(&self) {
		if let Err(error) = HtmlElement::focus(self) {
			warn!("Failed to focus: {:?}", error);
		}
	}
}

/// Templates from `<script type="text/x-template" id="t-<template id>">` elements of `document`.
#[derive(Debug, Clone)]
pub struct ScriptTemplates {
	document: Document,
}

impl ScriptTemplates {
	#[must_use]
	pub fn new(document: Document) -> Self {
		Self { document }
	}
}

impl TemplateSource for ScriptTemplates {
	fn template(&self, id: &str) -> Option<String> {
		self.document.get_element_by_id(&format!("t-{}", id)).map(|element| element.inner_html())
	}
}

/// Spawns onto the browser's microtask queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
	fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
		wasm_bindgen_futures::spawn_local(future);
		Ok(())
	}
}

/// `window.setInterval` and `window.setTimeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowScheduler;

fn millis(duration: Duration) -> i32 {
	i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

/// A timer callback can cancel its own timer, so closures are released on a later turn, never during a call.
fn release_later<T: 'static>(closure: T) {
	wasm_bindgen_futures::spawn_local(async move { drop(closure) })
}

impl Scheduler for WindowScheduler {
	fn interval(&self, period: Duration, tick: Box<dyn FnMut()>) -> TimerHandle {
		let window = web_sys::window().unwrap_throw();
		let closure = Closure::wrap(tick);
		let id = window
			.set_interval_with_callback_and_timeout_and_arguments_0(closure.as_ref().unchecked_ref::<Function>(), millis(period))
			.unwrap_throw();
		TimerHandle::new(move || {
			window.clear_interval_with_handle(id);
			release_later(closure);
		})
	}

	fn timeout(&self, delay: Duration, fire: Box<dyn FnOnce()>) -> TimerHandle {
		let window = web_sys::window().unwrap_throw();
		let mut fire = Some(fire);
		let closure = Closure::wrap(Box::new(move || {
			if let Some(fire) = fire.take() {
				fire()
			}
		}) as Box<dyn FnMut()>);
		let id = window
			.set_timeout_with_callback_and_timeout_and_arguments_0(closure.as_ref().unchecked_ref::<Function>(), millis(delay))
			.unwrap_throw();
		TimerHandle::new(move || {
			window.clear_timeout_with_handle(id);
			release_later(closure);
		})
	}
}

/// `window.fetch`, aborted through an `AbortController` when the returned future is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchTransport;

struct AbortOnDrop(Option<AbortController>);

impl AbortOnDrop {
	fn disarm(&mut self) {
		self.0 = None;
	}
}

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		if let Some(controller) = self.0.take() {
			controller.abort();
		}
	}
}

fn network_error(error: JsValue) -> TransportError {
	TransportError::Network(error.as_string().unwrap_or_else(|| format!("{:?}", error)))
}

fn start_fetch(request: &Request) -> Result<(Promise, AbortController), JsValue> {
	let controller = AbortController::new()?;
	let headers = Headers::new()?;
	for (name, value) in &request.headers {
		headers.set(name, value)?;
	}

	let mut init = RequestInit::new();
	init.method("GET").headers(&headers).signal(Some(&controller.signal()));
	let request = web_sys::Request::new_with_str_and_init(&request.url, &init)?;
	let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
	Ok((window.fetch_with_request(&request), controller))
}

fn response_headers(headers: &Headers) -> Vec<(String, String)> {
	match js_sys::try_iter(headers) {
		Ok(Some(entries)) => entries
			.filter_map(Result::ok)
			.filter_map(|entry| {
				let pair = Array::from(&entry);
				Some((pair.get(0).as_string()?, pair.get(1).as_string()?))
			})
			.collect(),
		_ => Vec::new(),
	}
}

impl Transport for FetchTransport {
	#[instrument(skip(self, request), fields(url = %request.url))]
	fn fetch(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>> {
		let (promise, controller) = match start_fetch(&request) {
			Ok(started) => started,
			Err(error) => return future::ready(Err(network_error(error))).boxed_local(),
		};
		let mut guard = AbortOnDrop(Some(controller));

		async move {
			let response: web_sys::Response = JsFuture::from(promise).await.map_err(network_error)?.dyn_into().map_err(network_error)?;
			let body = JsFuture::from(response.text().map_err(network_error)?).await.map_err(network_error)?;
			guard.disarm();
			Ok(Response {
				status: response.status(),
				status_text: response.status_text(),
				headers: response_headers(&response.headers()),
				body: body.as_string().unwrap_or_default(),
			})
		}
		.boxed_local()
	}
}

/// Shows per-path cache state as one `<p class="state-…">` per path inside a panel element.
#[derive(Debug)]
pub struct DebugPanel {
	panel: HtmlElement,
	rows: RefCell<HashMap<String, HtmlElement>>,
}

impl DebugPanel {
	#[must_use]
	pub fn new(panel: HtmlElement) -> Self {
		Self {
			panel,
			rows: RefCell::default(),
		}
	}
}

fn state_class(state: MonitorState) -> &'static str {
	match state {
		MonitorState::Idle => "state-idle",
		MonitorState::Pending => "state-pending",
		MonitorState::Valid => "state-valid",
		MonitorState::Invalid => "state-invalid",
		MonitorState::Error => "state-error",
	}
}

impl CacheMonitor for DebugPanel {
	fn changed(&self, path: &str, state: MonitorState) {
		let mut rows = self.rows.borrow_mut();
		if !rows.contains_key(path) {
			let row = match self.panel.owner_document().map(|document| document.create_element("p")) {
				Some(Ok(row)) => row.unchecked_into::<HtmlElement>(),
				_ => return error!("Failed to create debug row for {:?}.", path),
			};
			row.set_text_content(Some(path));
			if let Err(error) = self.panel.append_child(&row) {
				return error!("Failed to add debug row for {:?}: {:?}", path, error);
			}
			rows.insert(path.to_owned(), row);
		}
		if let Some(row) = rows.get(path) {
			row.set_class_name(state_class(state));
		}
	}
}

/// A [`CacheHost`] wired to the browser.
#[must_use]
pub fn browser_host(errors: Rc<dyn ErrorSink>, monitor: Option<Rc<dyn CacheMonitor>>) -> CacheHost {
	CacheHost {
		transport: Rc::new(FetchTransport),
		spawner: Rc::new(BrowserSpawner),
		clock: Rc::new(SystemClock),
		scheduler: Rc::new(WindowScheduler),
		errors,
		monitor,
	}
}

/// Sets `document.title`, usually to [`View::document_title`](`crate::view::View::document_title`).
pub fn set_document_title(title: &str) {
	if let Some(document) = web_sys::window().and_then(|window| window.document()) {
		document.set_title(title);
	}
}
