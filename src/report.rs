//! Error reports handed to the application.

use crate::transport::{Response, TransportError};
use core::{
	fmt::{self, Display, Formatter},
	time::Duration,
};
use html_escape::encode_text;

/// Classification of a failed data load. [`Display`] gives the short category string used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
	/// HTTP 403.
	Permission,
	/// HTTP 400.
	InvalidData,
	/// HTTP 500.
	ExecutionFailure,
	/// HTTP 503 and 504.
	Unavailable,
	/// The server set an `X-Rest-Status` application error code.
	ApplicationFailure,
	/// Anything else, including network failures.
	Communication,
	/// A non-`200` status reached the success path.
	BadStatus,
	BadContentType,
	BadJson,
	/// Processing a successful response failed.
	Exception,
}

impl ErrorCategory {
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCategory::Permission => "permission",
			ErrorCategory::InvalidData => "data-fail",
			ErrorCategory::ExecutionFailure => "exec-fail",
			ErrorCategory::Unavailable => "unavailable",
			ErrorCategory::ApplicationFailure => "app-fail",
			ErrorCategory::Communication => "comm-error",
			ErrorCategory::BadStatus => "bad-status",
			ErrorCategory::BadContentType => "bad-ctype",
			ErrorCategory::BadJson => "bad-json",
			ErrorCategory::Exception => "exception",
		}
	}
}

impl Display for ErrorCategory {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One consolidated error, as handed to an [`ErrorSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
	/// How long to show the report.
	pub timeout: Duration,
	/// Source location that raised the report.
	pub file: &'static str,
	pub line: u32,
	pub category: ErrorCategory,
	/// HTML-safe message text.
	pub message: String,
	/// Whether to show the report to the user, in addition to logging it remotely.
	pub show: bool,
}

/// Presents and/or logs reports. Usually the enclosing application.
pub trait ErrorSink {
	fn report(&self, report: ErrorReport);
}

impl<F: Fn(ErrorReport)> ErrorSink for F {
	fn report(&self, report: ErrorReport) {
		self(report)
	}
}

/// A classified failure before it's turned into an [`ErrorReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	pub category: ErrorCategory,
	pub message: String,
	/// Server-side correlation id (`X-Error-ID`).
	pub error_id: Option<String>,
}

impl Failure {
	/// Appends the correlation id, if any, to the message.
	#[must_use]
	pub fn into_message(self) -> String {
		match self.error_id {
			Some(id) => format!("{}; server error id: {}", self.message, encode_text(&id)),
			None => self.message,
		}
	}
}

/// Classifies an HTTP response that isn't a success.
#[must_use]
pub fn classify_response(response: &Response, path: &str) -> Failure {
	let app_code = response.header("X-Rest-Status").and_then(|code| code.trim().parse::<i64>().ok()).filter(|&code| code != 0);

	let mut detail = match response.header("X-Error-Detail") {
		Some(detail) if !detail.is_empty() => encode_text(detail).into_owned(),
		_ => format!("Data server responded {} (HTTP status {})", encode_text(&response.status_text), response.status),
	};
	if let Some(info) = response.header("X-Error-Info").filter(|info| !info.is_empty()) {
		detail.push_str(": ");
		detail.push_str(&encode_text(info));
	}
	if let Some(code) = app_code {
		detail.push_str(&format!(", server error code {}", code));
	}
	detail.push_str(" while retrieving ");
	detail.push_str(&encode_text(path));

	let (category, message) = match (app_code, response.status) {
		(Some(_), _) => (ErrorCategory::ApplicationFailure, detail),
		(None, 403) => (ErrorCategory::Permission, format!("Permission denied. {}", detail)),
		(None, 400) => (ErrorCategory::InvalidData, format!("Invalid data. {}", detail)),
		(None, 500) => (ErrorCategory::ExecutionFailure, format!("Operation failed. {}", detail)),
		(None, 503) | (None, 504) => (ErrorCategory::Unavailable, format!("Service unavailable. {}", detail)),
		(None, _) => (ErrorCategory::Communication, format!("Communication failure. {}", detail)),
	};

	Failure {
		category,
		message,
		error_id: response.header("X-Error-ID").filter(|id| !id.is_empty()).map(str::to_owned),
	}
}

/// Classifies a request that never got a response.
#[must_use]
pub fn classify_transport_error(error: &TransportError, path: &str) -> Failure {
	Failure {
		category: ErrorCategory::Communication,
		message: format!("Communication failure. {} while retrieving {}", encode_text(&error.to_string()), encode_text(path)),
		error_id: None,
	}
}
