//! Interpretation of successful data server responses.

use crate::{report::ErrorCategory, transport::Response};
use chrono::{DateTime, Duration, Utc};
use core::convert::TryFrom;
use serde_json::{Map, Value};
use thiserror::Error;

const EXPECTED_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("expected 'application/json' reply, got '{0}'")]
	ContentType(String),
	#[error("failed to parse json: {0}")]
	Json(#[from] serde_json::Error),
	#[error("failed to understand json result starting with '{0}...'")]
	Shape(String),
	#[error("result row {index} is {found}, not an array of cells")]
	Row { index: usize, found: &'static str },
}

impl DecodeError {
	#[must_use]
	pub fn category(&self) -> ErrorCategory {
		match self {
			DecodeError::ContentType(_) => ErrorCategory::BadContentType,
			DecodeError::Json(_) | DecodeError::Shape(_) => ErrorCategory::BadJson,
			DecodeError::Row { .. } => ErrorCategory::Exception,
		}
	}
}

/// Decodes a `200` response body.
///
/// `{"result": [...], "desc": {"columns": [...]}}` turns each result row into an object keyed by column name,
/// `{"result": ...}` is used as it is.
pub fn decode(response: &Response) -> Result<Value, DecodeError> {
	let content_type = response.header("Content-Type").unwrap_or_default();
	let media_type = content_type.split(';').next().unwrap_or_default().trim();
	if !media_type.eq_ignore_ascii_case(EXPECTED_CONTENT_TYPE) {
		return Err(DecodeError::ContentType(content_type.to_owned()));
	}

	let mut envelope: Value = serde_json::from_str(&response.body)?;
	let result = match envelope.get_mut("result").map(Value::take) {
		Some(result) if !result.is_null() => result,
		_ => return Err(shape_error(&response.body)),
	};

	let columns = envelope.get("desc").and_then(|desc| desc.get("columns")).and_then(Value::as_array);
	match columns {
		None => Ok(result),
		Some(columns) => {
			let columns: Vec<String> = columns
				.iter()
				.map(|column| match column {
					Value::String(name) => name.clone(),
					other => other.to_string(),
				})
				.collect();
			match result {
				Value::Array(rows) => zip_rows(&columns, rows),
				_ => Err(shape_error(&response.body)),
			}
		}
	}
}

fn zip_rows(columns: &[String], rows: Vec<Value>) -> Result<Value, DecodeError> {
	rows.into_iter()
		.enumerate()
		.map(|(index, row)| match row {
			Value::Array(cells) => {
				let mut cells = cells.into_iter();
				// Short rows fill the remaining columns with `true`.
				Ok(Value::Object(columns.iter().map(|column| (column.clone(), cells.next().unwrap_or(Value::Bool(true)))).collect::<Map<_, _>>()))
			}
			other => Err(DecodeError::Row { index, found: json_type(&other) }),
		})
		.collect::<Result<Vec<_>, _>>()
		.map(Value::Array)
}

fn shape_error(body: &str) -> DecodeError {
	DecodeError::Shape(body.chars().take(30).collect())
}

fn json_type(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}

/// When a response received at `now` goes stale: `Date` plus `Cache-Control: max-age` if both are present,
/// otherwise `now` plus `default_max_age_secs`.
#[must_use]
pub fn expires_at(response: &Response, now: DateTime<Utc>, default_max_age_secs: u64) -> DateTime<Utc> {
	let date = response.header("Date").and_then(|date| DateTime::parse_from_rfc2822(date.trim()).ok());
	let max_age = response.header("Cache-Control").and_then(max_age);
	let server_expiry = match (date, max_age) {
		(Some(date), Some(max_age)) => date.with_timezone(&Utc).checked_add_signed(Duration::seconds(i64::from(max_age))),
		_ => None,
	};
	server_expiry.unwrap_or_else(|| {
		let default_max_age = Duration::seconds(i64::try_from(default_max_age_secs).unwrap_or(i64::from(u32::MAX)));
		now.checked_add_signed(default_max_age).unwrap_or(now)
	})
}

/// The `max-age` directive of a `Cache-Control` header value.
#[must_use]
pub fn max_age(cache_control: &str) -> Option<u32> {
	cache_control
		.split(',')
		.find_map(|directive| directive.trim().strip_prefix("max-age=").and_then(|seconds| seconds.trim_matches('"').parse().ok()))
}
