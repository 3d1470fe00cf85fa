//! View content reconciliation and a coalescing data cache for the Overview monitoring dashboard.
//!
//! The two halves meet in [`view::View`]: navigation [`require`](`cache::RequestCache::require`)s data paths from a
//! [`RequestCache`](`cache::RequestCache`), whose callbacks queue the results into a [`ViewContent`](`content::ViewContent`),
//! which [`render`](`content::ViewContent::render`)s them into the page without clobbering form fields the user already edited.
//!
//! Everything the page provides is a trait ([`node::DomNode`], [`transport::Transport`], [`timer::Scheduler`], …),
//! so the core runs natively. The browser implementations live in `web`, which is only compiled for `wasm32`.

#![doc(html_root_url = "https://docs.rs/overview-dom/0.0.3")]
#![warn(clippy::pedantic)]

pub mod apply;
pub mod cache;
pub mod config;
pub mod content;
pub mod content_set;
pub mod decode;
pub mod loader;
pub mod node;
pub mod plot;
pub mod report;
pub mod timer;
pub mod transport;
pub mod view;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use cache::{CacheHost, RequestCache};
pub use content::ViewContent;
pub use content_set::ViewContentSet;
pub use node::{DomNode, FormValue, SlotKind, TemplateSource};
