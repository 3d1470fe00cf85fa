//! The document capabilities [`ViewContent`](`crate::content::ViewContent`) needs from its host page.

use core::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// Attribute naming a template slot. Every descendant carrying it becomes a modifiable element of the view.
pub const SLOT_ATTRIBUTE: &str = "x-element";

/// Attribute stamped onto the document region with the id of the template currently rendered into it.
pub const VIEW_MARKER_ATTRIBUTE: &str = "x-view-id";

/// CSS class toggled on text slots whose validator rejects the current value.
pub const INVALID_VALUE_CLASS: &str = "invalid-value";

/// CSS class added to disabled form controls.
pub const FADED_CLASS: &str = "faded";

/// Event handler callable from the page.
pub type Handler = Rc<dyn Fn()>;

/// A node of the host document, cheap to clone (a handle, not the node itself).
///
/// Implementations must behave like the DOM for the subset used here: [`set_content`](`DomNode::set_content`)
/// replaces all descendants, slot lookups only search descendants, and dropping a [`DomNode::Listener`]
/// unregisters it.
pub trait DomNode: Clone + 'static {
	/// Registration handle returned by [`listen`](`DomNode::listen`). Dropping it removes the listener.
	type Listener;

	/// Creates a detached container node in the same document, used as offscreen buffer.
	fn create_buffer(&self) -> Self;

	/// All descendants carrying [`SLOT_ATTRIBUTE`], in document order.
	fn slots(&self) -> Vec<Self>;

	/// The first descendant whose [`SLOT_ATTRIBUTE`] equals `name`.
	fn slot(&self, name: &str) -> Option<Self>;

	/// Upper-case tag name, like `Element.tagName` for HTML elements.
	fn tag_name(&self) -> String;

	fn attribute(&self, name: &str) -> Option<String>;
	fn set_attribute(&self, name: &str, value: &str);

	/// Markup of all descendants.
	fn content(&self) -> String;
	fn set_content(&self, html: &str);

	fn style(&self, property: &str) -> String;
	fn set_style(&self, property: &str, value: &str);

	/// Untrimmed form value of an `<input>`, `<select>` or `<textarea>`.
	fn value(&self) -> String;
	fn set_value(&self, value: &str);

	fn checked(&self) -> bool;
	fn set_checked(&self, checked: bool);

	/// Selects the `<option>` with the given value, if there is one.
	fn select_option(&self, value: &str);

	fn set_disabled(&self, disabled: bool);

	fn add_class(&self, class: &str);
	fn remove_class(&self, class: &str);

	fn listen(&self, event: &str, handler: Handler) -> Self::Listener;

	fn focus(&self);
}

/// Provides template markup by template id.
pub trait TemplateSource {
	fn template(&self, id: &str) -> Option<String>;
}

impl<F: Fn(&str) -> Option<String>> TemplateSource for F {
	fn template(&self, id: &str) -> Option<String> {
		self(id)
	}
}

/// How a slot's value is read and written, determined once when the template is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
	/// `<input>` (other than checkboxes) and `<textarea>`: trimmed text.
	Text,
	/// `<select>`: the selected option's value.
	Choice,
	/// `<input type=checkbox>`: whether it's checked.
	Checkbox,
	/// Anything else: the element's content.
	Static,
}

/// A scanned template slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
	pub name: String,
	pub kind: SlotKind,
	/// Whether this is a form control that can be disabled (this includes `<button>`s).
	pub control: bool,
}

impl Slot {
	/// Classifies `node`, which must carry [`SLOT_ATTRIBUTE`].
	pub fn scan<N: DomNode>(node: &N) -> Option<Self> {
		let name = node.attribute(SLOT_ATTRIBUTE)?;
		let tag = node.tag_name().to_ascii_uppercase();
		let (kind, control) = match tag.as_str() {
			"SELECT" => (SlotKind::Choice, true),
			"TEXTAREA" => (SlotKind::Text, true),
			"INPUT" => match node.attribute("type") {
				Some(ty) if ty.eq_ignore_ascii_case("checkbox") => (SlotKind::Checkbox, true),
				_ => (SlotKind::Text, true),
			},
			"BUTTON" => (SlotKind::Static, true),
			_ => (SlotKind::Static, false),
		};
		Some(Self { name, kind, control })
	}
}

/// A form value as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
	Text(String),
	Checked(bool),
}

impl FormValue {
	/// Checkbox interpretation: non-empty text other than `"false"` counts as checked.
	#[must_use]
	pub fn is_checked(&self) -> bool {
		match self {
			FormValue::Checked(checked) => *checked,
			FormValue::Text(text) => !text.is_empty() && text != "false",
		}
	}

	#[must_use]
	pub fn as_text(&self) -> &str {
		match self {
			FormValue::Text(text) => text,
			FormValue::Checked(true) => "true",
			FormValue::Checked(false) => "false",
		}
	}
}

impl Display for FormValue {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_text())
	}
}

impl From<&str> for FormValue {
	fn from(text: &str) -> Self {
		FormValue::Text(text.to_owned())
	}
}

impl From<String> for FormValue {
	fn from(text: String) -> Self {
		FormValue::Text(text)
	}
}

impl From<bool> for FormValue {
	fn from(checked: bool) -> Self {
		FormValue::Checked(checked)
	}
}

/// Reads `node` according to `kind`. Text is trimmed.
pub fn read_value<N: DomNode>(node: &N, kind: SlotKind) -> FormValue {
	match kind {
		SlotKind::Choice => FormValue::Text(node.value()),
		SlotKind::Text => FormValue::Text(node.value().trim().to_owned()),
		SlotKind::Checkbox => FormValue::Checked(node.checked()),
		SlotKind::Static => FormValue::Text(node.content()),
	}
}

/// Writes `value` to `node` according to `kind`, touching the node only if it differs.
pub fn write_value<N: DomNode>(node: &N, kind: SlotKind, value: &FormValue) {
	match kind {
		SlotKind::Choice => {
			if node.value() != value.as_text() {
				node.select_option(value.as_text())
			}
		}
		SlotKind::Text => crate::apply::apply_value(node, value.as_text()),
		SlotKind::Checkbox => {
			let checked = value.is_checked();
			if node.checked() != checked {
				node.set_checked(checked)
			}
		}
		SlotKind::Static => crate::apply::apply_content(node, value.as_text()),
	}
}
