//! A top-level dashboard view: a group of pages sharing one document region and one menu entry.

use crate::{
	apply::apply_content,
	cache::RequestCache,
	content::ViewContent,
	content_set::ViewContentSet,
	node::{DomNode, TemplateSource},
};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::rc::Rc;
use tracing::{debug, instrument, warn};

/// Appended to every document title.
pub const APPLICATION_NAME: &str = "Overview";

/// One page of a [`View`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
	/// Path segment below the view. Empty for the view's main page.
	pub label: String,
	pub title: Option<String>,
	/// Template name, defaulting to the label. Pages without one aren't routed.
	pub template: Option<String>,
	url: String,
}

impl Page {
	#[must_use]
	pub fn new(label: &str) -> Self {
		Self {
			label: label.to_owned(),
			title: None,
			template: None,
			url: String::new(),
		}
	}

	#[must_use]
	pub fn titled(mut self, title: &str) -> Self {
		self.title = Some(title.to_owned());
		self
	}

	#[must_use]
	pub fn with_template(mut self, template: &str) -> Self {
		self.template = Some(template.to_owned());
		self
	}

	/// `/<view id>` or `/<view id>/<label>`. Set when the page is added to a view.
	#[must_use]
	pub fn url(&self) -> &str {
		&self.url
	}

	fn template_name(&self) -> Option<&str> {
		self.template.as_deref().or_else(|| Some(self.label.as_str()).filter(|label| !label.is_empty()))
	}
}

/// A dashboard view.
///
/// Each page with a template gets a route and a [`ViewContent`] for `view-<id>-<template>`. Dispatching a route
/// attaches that content to the shared document region, retitles the document and renders the (still empty) page, then
/// hands the content back so the caller can queue data into it as it arrives.
#[derive(Debug)]
pub struct View<N: DomNode> {
	id: String,
	label: String,
	rank: i32,
	doc: N,
	cache: RequestCache,
	pages: Vec<Page>,
	routes: Vec<(String, usize)>,
	views: ViewContentSet<N>,
	page: Option<usize>,
	title: String,
}

impl<N: DomNode> View<N> {
	#[must_use]
	pub fn new(rank: i32, label: &str, pages: Vec<Page>, doc: N, templates: &Rc<dyn TemplateSource>, cache: RequestCache) -> Self {
		let id = label.to_lowercase().replacen('/', "-", 1);

		let mut pages = pages;
		let mut template_ids: Vec<(String, String)> = Vec::new();
		let mut routes: Vec<(String, usize)> = Vec::new();
		for (index, page) in pages.iter_mut().enumerate() {
			page.url = if page.label.is_empty() { format!("/{}", id) } else { format!("/{}/{}", id, page.label) };

			let template = match page.template_name() {
				Some(template) => template.to_owned(),
				None => continue,
			};
			if !template_ids.iter().any(|(name, _)| *name == template) {
				template_ids.push((template.clone(), format!("view-{}-{}", id, template)));
			}

			if routes.iter().any(|(url, _)| *url == page.url) {
				continue;
			}
			if index == 0 && !page.label.is_empty() {
				routes.push((format!("/{}", id), index));
			}
			routes.push((page.url.clone(), index));
		}

		let views = ViewContentSet::new(template_ids.iter().map(|(name, template_id)| (name.as_str(), template_id.as_str())), templates);
		debug!(id = %id, pages = pages.len(), routes = routes.len(), "Created view.");

		Self {
			id,
			label: label.to_owned(),
			rank,
			doc,
			cache,
			pages,
			routes,
			views,
			page: None,
			title: String::new(),
		}
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn label(&self) -> &str {
		&self.label
	}

	/// Menu position.
	#[must_use]
	pub fn rank(&self) -> i32 {
		self.rank
	}

	#[must_use]
	pub fn pages(&self) -> &[Page] {
		&self.pages
	}

	/// The most recently dispatched page.
	#[must_use]
	pub fn page(&self) -> Option<&Page> {
		self.page.and_then(|index| self.pages.get(index))
	}

	/// All routed URLs, in registration order.
	pub fn routes(&self) -> impl Iterator<Item = &str> {
		self.routes.iter().map(|(url, _)| url.as_str())
	}

	/// The page routed at `url`.
	#[must_use]
	pub fn route(&self, url: &str) -> Option<&Page> {
		self.routes.iter().find(|(route, _)| route == url).and_then(|&(_, index)| self.pages.get(index))
	}

	/// The document title last set by [`title`](`View::title`).
	#[must_use]
	pub fn document_title(&self) -> &str {
		&self.title
	}

	/// Sets and returns the document title: the non-empty `parts`, then this view's label, then [`APPLICATION_NAME`],
	/// joined by `" | "`.
	pub fn title(&mut self, parts: &[&str]) -> &str {
		let mut title: Vec<&str> = parts.iter().copied().filter(|part| !part.is_empty()).collect();
		title.push(&self.label);
		title.push(APPLICATION_NAME);
		self.title = title.join(" | ");
		&self.title
	}

	/// Shows the page routed at `url`. Returns its content, already attached and rendered once.
	///
	/// Returns [`None`] for URLs this view doesn't route.
	#[instrument(skip(self), fields(view = %self.id))]
	pub fn dispatch(&mut self, url: &str) -> Option<&mut ViewContent<N>> {
		let index = match self.routes.iter().find(|(route, _)| route == url) {
			Some(&(_, index)) => index,
			None => {
				warn!("No page routed at {:?}.", url);
				return None;
			}
		};
		self.template_page(index)
	}

	fn template_page(&mut self, index: usize) -> Option<&mut ViewContent<N>> {
		let page = self.pages.get(index)?;
		let template = page.template_name()?.to_owned();
		let page_title = page.title.clone().unwrap_or_default();

		self.page = Some(index);
		self.title(&[page_title.as_str()]);

		let view = self.views.attach(&template, self.doc.clone())?;
		view.render();
		Some(view)
	}

	/// Prepares for internal navigation by dropping all user edits.
	pub fn prenavigate(&mut self) {
		self.views.lose_values();
	}

	/// Leaves the view: detaches all content, cancels outstanding data requests and clears the document region.
	#[instrument(skip(self), fields(view = %self.id))]
	pub fn detach(&mut self) {
		self.views.detach();
		self.cache.cancel();
		self.page = None;
		apply_content(&self.doc, "");
	}

	/// Responds to a data load failure by detaching the content and clearing the document region.
	///
	/// The next [`dispatch`](`View::dispatch`) rebuilds the page from its template.
	#[instrument(skip(self), fields(view = %self.id))]
	pub fn error(&mut self) {
		self.views.detach();
		apply_content(&self.doc, "");
	}

	/// The currently attached content, if any.
	pub fn content(&mut self) -> Option<&mut ViewContent<N>> {
		self.views.current_view()
	}

	#[must_use]
	pub fn views(&self) -> &ViewContentSet<N> {
		&self.views
	}

	#[must_use]
	pub fn cache(&self) -> &RequestCache {
		&self.cache
	}

	/// Markup of this view's entry in the navigation menu.
	#[must_use]
	pub fn menu_entry(&self, base_url: &str, first: bool) -> String {
		format!(
			"<h2 class=\"title{}\" id=\"view-{}\"><a class=\"internal\" href=\"{}/{}\">{}</a></h2>",
			if first { " first" } else { "" },
			encode_double_quoted_attribute(&self.id),
			encode_double_quoted_attribute(base_url),
			encode_double_quoted_attribute(&self.id),
			encode_text(&self.label)
		)
	}
}
