//! Core types shared by the pipeline, renderer and CLI.

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde_json::Value;

/// Content type of full-replacement JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type of JSON Merge Patch (RFC 7386) bodies.
pub const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Nesting depth at which rendering gives up on a backing object graph.
pub const DEFAULT_MAX_RENDER_DEPTH: usize = 32;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Transport-agnostic response triple: status, headers and body.
///
/// The HTTP binding turns this into its own response type; [`http::Response`]
/// is supported out of the box through `From`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Response {
    /// Create a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Create a JSON response.
    ///
    /// Empty content is legal and leaves `Content-Type` unset.
    pub fn json(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status, body);
        if !response.body.is_empty() {
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        response
    }

    /// Look up a header as text. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decode the body as JSON. Returns `None` for empty or malformed bodies.
    pub fn json_body(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

impl From<Response> for http::Response<String> {
    fn from(response: Response) -> Self {
        let mut out = http::Response::new(response.body);
        *out.status_mut() = response.status;
        *out.headers_mut() = response.headers;
        out
    }
}

/// Settings for the request pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// `Cache-Control` applied when neither the endpoint nor the handler sets one.
    pub default_cache_control: Option<String>,
    /// Maximum nesting depth when rendering resources.
    pub max_render_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_cache_control: None,
            max_render_depth: DEFAULT_MAX_RENDER_DEPTH,
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback `Cache-Control` value.
    pub fn default_cache_control(mut self, value: impl Into<String>) -> Self {
        self.default_cache_control = Some(value.into());
        self
    }

    /// Set the render depth limit.
    pub fn max_render_depth(mut self, depth: usize) -> Self {
        self.max_render_depth = depth;
        self
    }
}
