//! The HTTP side of the cache.

use futures::future::LocalBoxFuture;
use thiserror::Error;

/// A `GET` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub url: String,
	pub headers: Vec<(String, String)>,
}

impl Request {
	#[must_use]
	pub fn header(&self, name: &str) -> Option<&str> {
		find_header(&self.headers, name)
	}
}

/// A response with its body already read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
	pub status: u16,
	pub status_text: String,
	pub headers: Vec<(String, String)>,
	pub body: String,
}

impl Response {
	#[must_use]
	pub fn new(status: u16, status_text: impl Into<String>) -> Self {
		Self {
			status,
			status_text: status_text.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	#[must_use]
	pub fn with_body(mut self, body: impl Into<String>) -> Self {
		self.body = body.into();
		self
	}

	/// Case-insensitive header lookup.
	#[must_use]
	pub fn header(&self, name: &str) -> Option<&str> {
		find_header(&self.headers, name)
	}
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
	headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	#[error("network failure: {0}")]
	Network(String),
}

/// Issues requests. Dropping a returned future must abort its request.
pub trait Transport {
	fn fetch(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>>;
}
