//! Write-if-different helpers.
//!
//! Setting a property to the value it already has can still fire page events and reset selection or caret state,
//! so everything the reconciler writes goes through these.

use crate::node::DomNode;
use tracing::trace;

/// Sets the markup of `node` to `html` unless it's already equivalent.
///
/// Pages serialise markup in their own way (attribute quoting, entity use, …), so `html` is first normalised by a
/// round trip through an offscreen buffer before comparing.
pub fn apply_content<N: DomNode>(node: &N, html: &str) {
	let scratch = node.create_buffer();
	scratch.set_content(html);
	let normalised = scratch.content();
	if node.content() != normalised {
		if cfg!(feature = "dangerous-logging") {
			trace!(html, "Replacing content.");
		} else {
			trace!(len = html.len(), "Replacing content.");
		}
		node.set_content(html)
	}
}

pub fn apply_value<N: DomNode>(node: &N, value: &str) {
	if node.value() != value {
		node.set_value(value)
	}
}

pub fn apply_style<N: DomNode>(node: &N, property: &str, value: &str) {
	if node.style(property) != value {
		node.set_style(property, value)
	}
}

pub fn apply_attribute<N: DomNode>(node: &N, name: &str, value: &str) {
	if node.attribute(name).as_deref() != Some(value) {
		node.set_attribute(name, value)
	}
}
