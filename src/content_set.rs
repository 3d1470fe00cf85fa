use crate::{
	content::ViewContent,
	node::{DomNode, TemplateSource},
};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::{error, instrument};

/// A set of named [`ViewContent`]s sharing one document region. At most one of them is attached at a time.
#[derive(Debug)]
pub struct ViewContentSet<N: DomNode> {
	views: HashMap<String, ViewContent<N>>,
	current: Option<String>,
}

impl<N: DomNode> ViewContentSet<N> {
	/// Creates a detached [`ViewContent`] for each `(label, template id)` pair.
	pub fn new<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>, templates: &Rc<dyn TemplateSource>) -> Self {
		Self {
			views: items.into_iter().map(|(label, id)| (label.to_owned(), ViewContent::new(id, Rc::clone(templates)))).collect(),
			current: None,
		}
	}

	/// Detaches every other view, then attaches view `name` to `doc` and makes it the current one.
	///
	/// Returns [`None`] (and leaves nothing attached) if `name` is unknown.
	#[instrument(skip(self, doc))]
	pub fn attach(&mut self, name: &str, doc: N) -> Option<&mut ViewContent<N>> {
		for (label, view) in &mut self.views {
			if label != name {
				view.detach();
			}
		}

		let view = match self.views.get_mut(name) {
			Some(view) => view,
			None => {
				error!("Unknown view content {:?}.", name);
				self.current = None;
				return None;
			}
		};
		view.attach(doc);
		self.current = Some(name.to_owned());
		Some(view)
	}

	/// Detaches all views.
	pub fn detach(&mut self) {
		self.current = None;
		for view in self.views.values_mut() {
			view.detach();
		}
	}

	/// Makes all views forget their user edits.
	pub fn lose_values(&mut self) {
		for view in self.views.values_mut() {
			view.lose_values();
		}
	}

	/// The label of the currently attached view.
	#[must_use]
	pub fn current(&self) -> Option<&str> {
		self.current.as_deref()
	}

	#[must_use]
	pub fn view(&self, name: &str) -> Option<&ViewContent<N>> {
		self.views.get(name)
	}

	pub fn view_mut(&mut self, name: &str) -> Option<&mut ViewContent<N>> {
		self.views.get_mut(name)
	}

	pub fn current_view(&mut self) -> Option<&mut ViewContent<N>> {
		let current = self.current.as_deref()?;
		self.views.get_mut(current)
	}
}
