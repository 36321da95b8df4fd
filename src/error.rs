//! Error types for declaration, validation, rendering and request handling.

use std::path::PathBuf;

use http::header::{HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::types::Response;

/// Message used when an authenticator rejects a request without saying why.
pub const DEFAULT_DENIAL: &str = "You don't have permission to do that.";

/// A single invalid or missing inbound argument (HTTP 422).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid argument: `{path}`. {message}")]
pub struct ArgumentError {
    /// Dotted path to the argument, e.g. `filter.count` for nested dict keys.
    pub path: String,
    /// Human-readable reason.
    pub message: String,
}

impl ArgumentError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// The caller lacks a valid credential or permission (HTTP 403).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthenticationError {
    pub message: String,
}

impl AuthenticationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for AuthenticationError {
    fn default() -> Self {
        Self::new(DEFAULT_DENIAL)
    }
}

/// An explicitly raised application error carrying its own status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// A patch named a field the resource does not declare.
    pub fn unexpected_field(path: &str) -> Self {
        Self::unprocessable_entity(format!("Unexpected field `{}`", path))
    }

    /// Build the `{"error": ...}` response for this error.
    pub fn to_response(&self) -> Response {
        error_response(self.status, &self.message)
    }
}

/// A non-error short circuit, such as a redirect.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("raised response with status {status}")]
pub struct RaisedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RaisedResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// A `302 Found` pointing at `location`.
    ///
    /// # Errors
    ///
    /// Returns an internal `ApiError` if `location` is not a valid header value.
    pub fn redirect(location: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(location)
            .map_err(|_| ApiError::internal(format!("invalid redirect location: {}", location)))?;
        Ok(Self::new(StatusCode::FOUND, "").with_header(LOCATION, value))
    }

    pub fn into_response(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Everything a pipeline stage or handler can fail with.
///
/// The four classified kinds become responses at the pipeline boundary;
/// `Unclassified` is logged and surfaced to the transport as a fatal error.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Raised(#[from] RaisedResponse),

    #[error("unclassified failure: {0}")]
    Unclassified(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Failure {
    pub fn unclassified(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Failure::Unclassified(error.into())
    }

    /// Status code this failure maps to, or `None` when unclassified.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Failure::Argument(_) => Some(StatusCode::UNPROCESSABLE_ENTITY),
            Failure::Authentication(_) => Some(StatusCode::FORBIDDEN),
            Failure::Api(e) => Some(e.status),
            Failure::Raised(r) => Some(r.status),
            Failure::Unclassified(_) => None,
        }
    }

    /// Convert a classified failure into its response.
    ///
    /// # Errors
    ///
    /// Unclassified failures are handed back unchanged.
    pub fn into_response(self) -> Result<Response, Failure> {
        match self {
            Failure::Argument(e) => Ok(error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                &e.to_string(),
            )),
            Failure::Authentication(e) => {
                let message = if e.message.is_empty() {
                    DEFAULT_DENIAL
                } else {
                    e.message.as_str()
                };
                Ok(error_response(StatusCode::FORBIDDEN, message))
            }
            Failure::Api(e) => Ok(e.to_response()),
            Failure::Raised(r) => Ok(r.into_response()),
            other @ Failure::Unclassified(_) => Err(other),
        }
    }
}

impl From<RenderError> for Failure {
    fn from(error: RenderError) -> Self {
        Failure::Unclassified(Box::new(error))
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    Response::json(status, json!({ "error": message }).to_string())
}

/// Errors raised while declaring resources, endpoints and APIs.
///
/// These are startup defects; none of them can happen mid-request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("`{owner}.{name}`: names beginning with `_` are reserved")]
    ReservedName { owner: String, name: String },

    #[error("`{owner}` declares a descriptor with an empty name")]
    EmptyName { owner: String },

    #[error("`{owner}` declares `{name}` more than once")]
    DuplicateName { owner: String, name: String },

    #[error("`{owner}` refers to undeclared field `{name}`")]
    UnknownField { owner: String, name: String },

    #[error("`{owner}.{name}`: {message}")]
    InvalidDeclaration {
        owner: String,
        name: String,
        message: String,
    },

    #[error("`{owner}` references unregistered resource `{name}`")]
    UnresolvedResource { owner: String, name: String },

    #[error("resource `{name}` is registered twice with different definitions")]
    DuplicateResource { name: String },

    #[error("route `{name}` is declared by more than one endpoint")]
    DuplicateRoute { name: String },

    #[error("endpoint `{route}` has no handler")]
    MissingHandler { route: String },

    #[error("pipeline has no {what} configured")]
    MissingCollaborator { what: &'static str },
}

/// Errors raised while rendering a backing object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("resource `{name}` is referenced by name but was never linked")]
    Unlinked { name: String },

    #[error("resource nesting exceeded {max} levels")]
    DepthExceeded { max: usize },

    #[error("field `{field}` expected {expected}, got {actual}")]
    Shape {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("`{resource}` has no field `{field}`")]
    UnknownField { resource: String, field: String },

    #[error("debug resource `{resource}` cannot render an opaque model")]
    Opaque { resource: String },
}

/// Fatal pipeline outcomes the transport must turn into its own 500.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("endpoint `{endpoint}` failed: {source}")]
    Unclassified {
        endpoint: String,
        #[source]
        source: Failure,
    },

    #[error("after-response hook of `{endpoint}` failed: {source}")]
    AfterResponse {
        endpoint: String,
        #[source]
        source: Failure,
    },
}

/// Errors while loading JSON payloads.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

/// Errors while checking a payload against a resource's JSON Schema.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid schema: {message}")]
    Schema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<Violation> },
}

impl CheckError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            CheckError::Load(e) => e.exit_code(),
            CheckError::Schema { .. } => 2,
            CheckError::Invalid { .. } => 1,
        }
    }
}

/// Single schema violation with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// JSON Pointer (RFC 6901) to the offending value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
