use crate::{
	apply::{apply_attribute, apply_content, apply_style},
	node::{read_value, write_value, DomNode, FormValue, Handler, Slot, SlotKind, TemplateSource, FADED_CLASS, INVALID_VALUE_CLASS, VIEW_MARKER_ATTRIBUTE},
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	mem,
};
use hashbrown::{HashMap, HashSet};
use std::{collections::BTreeMap, rc::Rc};
use tracing::{debug, error, instrument, trace, trace_span, warn};

/// Key of the built-in user-change binding in a slot's binding map. Can't collide with page event names.
const VALUE_CHANGE: &str = "$valueChange";

/// Form validator: receives the current (trimmed) value and the slot node, returns whether the value is acceptable.
pub type Validator<N> = Rc<dyn Fn(&FormValue, &N) -> bool>;

type OnceAction<N> = Box<dyn FnOnce(&ViewContent<N>)>;

/// Manages the dynamic content of one template instantiated into a document region.
///
/// The application [`attach`](`ViewContent::attach`)es the view, queues new content, form defaults, styles, event
/// handlers and a focus target for the template's slots (elements carrying [`x-element`](`crate::node::SLOT_ATTRIBUTE`)),
/// and then flushes everything with [`render`](`ViewContent::render`), which makes a minimal update of the page.
///
/// Form fields the user edited are tracked and respected: queued defaults only replace values the user hasn't touched,
/// and [`value_of`](`ViewContent::value_of`) returns the user's value or the default as appropriate.
/// [`lose_values`](`ViewContent::lose_values`) discards the user's edits, for example on navigation.
///
/// # Correct Use
///
/// The application must [`detach`](`ViewContent::detach`) the view before the document region is reused for any other
/// content, so that the next [`attach`](`ViewContent::attach`) knows to rebuild it from scratch.
pub struct ViewContent<N: DomNode> {
	id: String,
	templates: Rc<dyn TemplateSource>,
	doc: Option<N>,
	/// The current instantiation of the template, including any content queued during a pending rebuild.
	buffer: Option<N>,
	elements: Vec<Slot>,
	validators: Rc<RefCell<HashMap<String, Validator<N>>>>,
	values: HashMap<String, FormValue>,
	content: HashMap<String, String>,
	/// Slots whose value was changed by the user and overrides the defaults.
	in_charge: Rc<RefCell<HashSet<String>>>,
	take_charge: HashSet<String>,
	enabled: HashMap<String, bool>,
	style: HashMap<String, BTreeMap<String, String>>,
	events: HashMap<String, HashMap<String, N::Listener>>,
	event_requests: HashMap<String, HashMap<String, Handler>>,
	once: Vec<OnceAction<N>>,
	focus: Option<String>,
	rebuild: bool,
}

impl<N: DomNode> Debug for ViewContent<N> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ViewContent")
			.field("id", &self.id)
			.field("attached", &self.doc.is_some())
			.field("elements", &self.elements)
			.field("in_charge", &self.in_charge.borrow())
			.field("rebuild", &self.rebuild)
			.finish()
	}
}

impl<N: DomNode> ViewContent<N> {
	/// Creates a detached view for template `id`. The template is read from `templates` on each [`attach`](`ViewContent::attach`).
	#[must_use]
	pub fn new(id: impl Into<String>, templates: Rc<dyn TemplateSource>) -> Self {
		Self {
			id: id.into(),
			templates,
			doc: None,
			buffer: None,
			elements: Vec::new(),
			validators: Rc::default(),
			values: HashMap::new(),
			content: HashMap::new(),
			in_charge: Rc::default(),
			take_charge: HashSet::new(),
			enabled: HashMap::new(),
			style: HashMap::new(),
			events: HashMap::new(),
			event_requests: HashMap::new(),
			once: Vec::new(),
			focus: None,
			rebuild: false,
		}
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn is_attached(&self) -> bool {
		self.doc.is_some()
	}

	/// Whether the next [`render`](`ViewContent::render`) replaces the whole document region.
	#[must_use]
	pub fn needs_rebuild(&self) -> bool {
		self.rebuild
	}

	/// The slots found in the template, in document order.
	#[must_use]
	pub fn elements(&self) -> &[Slot] {
		&self.elements
	}

	/// Binds the view to `doc`. Call this before queuing anything, and [`render`](`ViewContent::render`) at the end.
	///
	/// If `doc` doesn't carry this view's marker (first attach, or the region was detached or taken over by another view),
	/// the next render rebuilds the whole region. Otherwise only incremental updates are made.
	#[instrument(skip(self, doc), fields(id = %self.id))]
	pub fn attach(&mut self, doc: N) {
		self.once.clear();
		self.focus = None;

		let template = self.templates.template(&self.id).unwrap_or_else(|| {
			error!("No template found for view {:?}. Rendering it empty.", self.id);
			String::new()
		});
		let buffer = doc.create_buffer();
		buffer.set_content(&template);
		self.elements = buffer.slots().iter().filter_map(|node| Slot::scan(node)).collect();
		for slot in &self.elements {
			self.enabled.insert(slot.name.clone(), true);
		}

		self.rebuild = doc.attribute(VIEW_MARKER_ATTRIBUTE).as_deref() != Some(self.id.as_str());
		self.buffer = Some(buffer);
		self.doc = Some(doc);
		debug!(rebuild = self.rebuild, slots = self.elements.len(), "Attached view content.");
	}

	/// Unregisters all event handlers, clears all internal state and removes the marker from the document region,
	/// so that the next [`attach`](`ViewContent::attach`) rebuilds it from scratch.
	#[instrument(skip(self), fields(id = %self.id))]
	pub fn detach(&mut self) {
		if let Some(doc) = self.doc.take() {
			doc.set_attribute(VIEW_MARKER_ATTRIBUTE, "");
		}

		let listeners: usize = self.events.values().map(HashMap::len).sum();
		self.events.clear();
		trace!("Dropped {} event listener(s).", listeners);

		self.buffer = None;
		self.elements.clear();
		self.validators.borrow_mut().clear();
		self.values.clear();
		self.content.clear();
		self.in_charge.borrow_mut().clear();
		self.take_charge.clear();
		self.enabled.clear();
		self.style.clear();
		self.event_requests.clear();
		self.once.clear();
		self.focus = None;
		self.rebuild = false;
	}

	/// Forgets all user edits, so the queued defaults win again on the next render.
	pub fn lose_values(&mut self) {
		self.in_charge.borrow_mut().clear();
	}

	/// The live node of slot `name`, or the document region itself for `None`.
	/// Only meaningful after [`render`](`ViewContent::render`), or inside a [`once`](`ViewContent::once`) action.
	#[must_use]
	pub fn node(&self, name: Option<&str>) -> Option<N> {
		let doc = self.doc.as_ref()?;
		match name {
			Some(name) => doc.slot(name),
			None => Some(doc.clone()),
		}
	}

	/// The offscreen node of slot `name` (or the whole buffer for `None`).
	///
	/// Reflects queued content and style during a pending rebuild, but not form values or event handlers.
	#[must_use]
	pub fn buffer(&self, name: Option<&str>) -> Option<N> {
		let buffer = self.buffer.as_ref()?;
		match name {
			Some(name) => buffer.slot(name),
			None => Some(buffer.clone()),
		}
	}

	/// Queues slot `name` to receive focus on the next render, if that render rebuilds the region.
	pub fn focus(&mut self, name: &str) {
		self.focus = Some(name.to_owned());
	}

	/// Queues `handler` for `event` on slot `name`.
	///
	/// A handler previously bound for the same event on the same slot is unregistered first, even if it was bound in an
	/// earlier cycle, so it's fine to register the same handlers on every cycle.
	pub fn on(&mut self, name: &str, event: &str, handler: impl Fn() + 'static) {
		self.event_requests.entry(name.to_owned()).or_insert_with(HashMap::new).insert(event.to_owned(), Rc::new(handler));
	}

	/// Queues the enabled state of a form control. Everything starts out enabled on attach.
	pub fn enable(&mut self, name: &str, enabled: bool) {
		self.enabled.insert(name.to_owned(), enabled);
	}

	/// Sets the validator run whenever the user edits text slot `name`.
	/// Rejected values mark the node with [`invalid-value`](`INVALID_VALUE_CLASS`).
	pub fn validator(&mut self, name: &str, validator: impl Fn(&FormValue, &N) -> bool + 'static) {
		self.validators.borrow_mut().insert(name.to_owned(), Rc::new(validator));
	}

	/// Queues the markup of slot `name`.
	pub fn content(&mut self, name: &str, html: &str) {
		if self.rebuild {
			match self.buffer(Some(name)) {
				Some(node) => apply_content(&node, html),
				None => warn!("Ignoring content for unknown slot {:?}.", name),
			}
		} else {
			self.content.insert(name.to_owned(), html.to_owned());
		}
	}

	/// Queues CSS `property` of slot `name`.
	pub fn style(&mut self, name: &str, property: &str, value: &str) {
		if self.rebuild {
			match self.buffer(Some(name)) {
				Some(node) => apply_style(&node, property, value),
				None => warn!("Ignoring style for unknown slot {:?}.", name),
			}
		} else {
			self.style.entry(name.to_owned()).or_insert_with(BTreeMap::new).insert(property.to_owned(), value.to_owned());
		}
	}

	/// Queues the default value of form slot `name`.
	///
	/// With `take_charge`, the value is applied as if the user had entered it: it overrides later defaults until
	/// [`lose_values`](`ViewContent::lose_values`) or [`detach`](`ViewContent::detach`).
	pub fn value(&mut self, name: &str, value: impl Into<FormValue>, take_charge: bool) {
		let value = value.into();
		if cfg!(feature = "dangerous-logging") {
			trace!(name, %value, take_charge, "Queued value.");
		} else {
			trace!(name, take_charge, "Queued value.");
		}
		self.values.insert(name.to_owned(), value);
		if take_charge {
			self.take_charge.insert(name.to_owned());
		}
	}

	/// The current value of slot `name`.
	///
	/// Between attach and render, this is the queued default for slots without user edits.
	/// Otherwise it's read from the page: trimmed text for text slots, the selected option's value for choices,
	/// the checked state for checkboxes and the content for anything else.
	#[must_use]
	pub fn value_of(&self, name: &str) -> Option<FormValue> {
		if let Some(value) = self.values.get(name) {
			if self.rebuild || !self.in_charge.borrow().contains(name) {
				return Some(value.clone());
			}
		}

		let node = self.node(Some(name))?;
		let kind = match self.elements.iter().find(|slot| slot.name == name) {
			Some(slot) => slot.kind,
			None => Slot::scan(&node).map_or(SlotKind::Static, |slot| slot.kind),
		};
		Some(read_value(&node, kind))
	}

	/// Whether user edits (or a take-charge value queued this cycle) override the defaults of slot `name`.
	#[must_use]
	pub fn in_charge(&self, name: &str) -> bool {
		self.in_charge.borrow().contains(name) || self.take_charge.contains(name)
	}

	/// Queues `action` to run once when the next render rebuilds the region, right after the new nodes were created.
	///
	/// Use this for one-time node setup like installing auto-completion. "Once" means once per node creation:
	/// nodes are recreated when the view is attached the first time and after each detach.
	pub fn once(&mut self, action: impl FnOnce(&Self) + 'static) {
		self.once.push(Box::new(action));
	}

	/// Flushes all queued updates to the page.
	///
	/// # Panics
	///
	/// In debug builds, if the view isn't attached or a scanned slot is missing from the document region.
	/// Release builds log these contract violations and skip the affected work.
	#[instrument(skip(self), fields(id = %self.id, rebuild = self.rebuild))]
	pub fn render(&mut self) {
		let doc = match &self.doc {
			Some(doc) => doc.clone(),
			None => {
				error!("render() called on detached view content {:?}.", self.id);
				if cfg!(debug_assertions) {
					panic!("overview-dom: render() called on detached view content {:?}", self.id)
				}
				return;
			}
		};

		let rebuild = self.rebuild;
		if rebuild {
			let span = trace_span!("Rebuilding document region");
			let _enter = span.enter();

			self.events.clear();

			let html = self.buffer.as_ref().map(DomNode::content).unwrap_or_default();
			doc.set_content(&html);
			apply_attribute(&doc, VIEW_MARKER_ATTRIBUTE, &self.id);

			let once = mem::take(&mut self.once);
			trace!("Running {} once action(s).", once.len());
			for action in once {
				action(&*self);
			}

			self.in_charge.borrow_mut().clear();
		}

		let elements = mem::take(&mut self.elements);
		for slot in &elements {
			self.render_slot(&doc, slot, rebuild);
		}
		self.elements = elements;

		self.take_charge.clear();
		self.event_requests.clear();
		self.focus = None;
		self.rebuild = false;
	}

	fn render_slot(&mut self, doc: &N, slot: &Slot, rebuild: bool) {
		let span = trace_span!("Reconciling slot", name = %slot.name, kind = ?slot.kind);
		let _enter = span.enter();

		let node = match doc.slot(&slot.name) {
			Some(node) => node,
			None => {
				error!("Slot {:?} is missing from the document region.", slot.name);
				if cfg!(debug_assertions) {
					panic!("overview-dom: slot {:?} of view {:?} is missing from the document region", slot.name, self.id)
				}
				return;
			}
		};

		if let Some(html) = self.content.get(&slot.name) {
			if slot.kind == SlotKind::Choice {
				// Replacing the options would silently change the selection.
				let selected = FormValue::Text(node.value());
				apply_content(&node, html);
				write_value(&node, SlotKind::Choice, &selected);
			} else {
				apply_content(&node, html);
			}
		}

		if let Some(style) = self.style.get(&slot.name) {
			for (property, value) in style {
				apply_style(&node, property, value);
			}
		}

		let user_owned = self.in_charge.borrow().contains(&slot.name);
		if !user_owned {
			if let Some(value) = self.values.get(&slot.name) {
				write_value(&node, slot.kind, value);
				if self.take_charge.contains(&slot.name) {
					self.in_charge.borrow_mut().insert(slot.name.clone());
				}
			}
		}

		if slot.control {
			let enabled = self.enabled.get(&slot.name).copied().unwrap_or(true);
			node.set_disabled(!enabled);
			if enabled {
				node.remove_class(FADED_CLASS);
			} else {
				node.add_class(FADED_CLASS);
			}
		}

		if !self.events.contains_key(&slot.name) {
			let mut bindings = HashMap::new();
			if let Some(event) = match slot.kind {
				SlotKind::Text => Some("input"),
				SlotKind::Choice | SlotKind::Checkbox => Some("change"),
				SlotKind::Static => None,
			} {
				trace!(event, "Binding user change listener.");
				bindings.insert(VALUE_CHANGE.to_owned(), node.listen(event, self.value_change_handler(&node, slot)));
			}
			self.events.insert(slot.name.clone(), bindings);
		}

		if let Some(requests) = self.event_requests.get(&slot.name) {
			let bindings = self.events.entry(slot.name.clone()).or_insert_with(HashMap::new);
			for (event, handler) in requests {
				if bindings.remove(event).is_some() {
					trace!(event = %event, "Replaced event handler.");
				}
				bindings.insert(event.clone(), node.listen(event, Rc::clone(handler)));
			}
		}

		if rebuild && self.focus.as_deref() == Some(slot.name.as_str()) {
			node.focus();
		}
	}

	fn value_change_handler(&self, node: &N, slot: &Slot) -> Handler {
		let in_charge = Rc::clone(&self.in_charge);
		let validators = Rc::clone(&self.validators);
		let name = slot.name.clone();
		let kind = slot.kind;
		let node = node.clone();
		Rc::new(move || {
			in_charge.borrow_mut().insert(name.clone());
			if kind != SlotKind::Text {
				return;
			}

			let validator = validators.borrow().get(&name).cloned();
			if let Some(validator) = validator {
				if validator(&read_value(&node, kind), &node) {
					node.remove_class(INVALID_VALUE_CLASS);
				} else {
					node.add_class(INVALID_VALUE_CLASS);
				}
			}
		})
	}
}
