//! Chart variants as data.
//!
//! A [`PlotSpec`] names a chart `kind` and carries its parameters. Drawing is looked up in a [`Renderers`] table, so
//! adding a chart type means registering one function instead of extending a class hierarchy.

use hashbrown::HashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{instrument, warn};

/// Which chart to draw, and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlotSpec {
	pub kind: String,
	#[serde(default)]
	pub parameters: BTreeMap<String, String>,
}

impl PlotSpec {
	#[must_use]
	pub fn new(kind: &str) -> Self {
		Self {
			kind: kind.to_owned(),
			parameters: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with(mut self, name: &str, value: &str) -> Self {
		self.parameters.insert(name.to_owned(), value.to_owned());
		self
	}

	#[must_use]
	pub fn parameter(&self, name: &str) -> Option<&str> {
		self.parameters.get(name).map(String::as_str)
	}
}

/// Draws one kind of chart onto a `C` (a canvas, an SVG root, a test recorder, …).
/// The `bool` is whether all of the chart's data is loaded.
pub type Renderer<C> = Box<dyn Fn(&mut C, &PlotSpec, bool)>;

/// Dispatch table from [`PlotSpec::kind`] to [`Renderer`].
pub struct Renderers<C> {
	table: HashMap<String, Renderer<C>>,
}

impl<C> Default for Renderers<C> {
	fn default() -> Self {
		Self { table: HashMap::new() }
	}
}

impl<C> core::fmt::Debug for Renderers<C> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_set().entries(self.table.keys()).finish()
	}
}

impl<C> Renderers<C> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `renderer` for `kind`, replacing any previous one.
	pub fn register(&mut self, kind: &str, renderer: impl Fn(&mut C, &PlotSpec, bool) + 'static) -> &mut Self {
		self.table.insert(kind.to_owned(), Box::new(renderer));
		self
	}

	#[must_use]
	pub fn supports(&self, kind: &str) -> bool {
		self.table.contains_key(kind)
	}

	/// Draws `spec` onto `canvas`. Returns `false` (and draws nothing) for an unknown kind.
	#[instrument(skip(self, canvas), fields(kind = %spec.kind))]
	pub fn render(&self, canvas: &mut C, spec: &PlotSpec, complete: bool) -> bool {
		match self.table.get(&spec.kind) {
			Some(renderer) => {
				renderer(canvas, spec, complete);
				true
			}
			None => {
				warn!("No renderer for plot kind {:?}.", spec.kind);
				false
			}
		}
	}
}
