//! Per-request context and the collaborators that create and authenticate it.

use std::collections::HashMap;

use http::header::{CONTENT_TYPE, COOKIE};
use http::HeaderMap;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::endpoint::{Endpoint, Reply};
use crate::error::{ApiError, Failure};
use crate::types::Response;

/// Mutable record threaded through one pipeline execution.
///
/// Created by a [`ContextFactory`], owned by a single request, dropped once
/// the response is produced.
#[derive(Debug, Default)]
pub struct Context {
    /// Route name of the endpoint being executed.
    pub endpoint: String,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    /// Path parameters extracted by the router.
    pub route_args: HashMap<String, String>,
    pub api_version: Option<String>,
    /// Inbound arguments as delivered by the transport; values may be lists.
    pub raw_args: Map<String, Value>,
    /// Raw arguments after version-dependent renaming.
    pub patched_args: Map<String, Value>,
    /// Validated arguments. Absent optional arguments have no entry.
    pub args: Map<String, Value>,
    pub body: Option<String>,
    /// Principal set by the authenticator, if any.
    pub current_user: Option<Value>,
    pub handler_result: Option<Reply>,
    pub response: Option<Response>,
}

impl Context {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(Value::as_i64)
    }

    pub fn arg_f64(&self, name: &str) -> Option<f64> {
        self.arg(name).and_then(Value::as_f64)
    }

    pub fn arg_bool(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(Value::as_bool)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type of the request body, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Builds a [`Context`] from a transport request.
pub trait ContextFactory<R>: Send + Sync {
    fn create(&self, endpoint: &Endpoint, request: R) -> Result<Context, Failure>;
}

impl<R, F> ContextFactory<R> for F
where
    F: Fn(&Endpoint, R) -> Result<Context, Failure> + Send + Sync,
{
    fn create(&self, endpoint: &Endpoint, request: R) -> Result<Context, Failure> {
        self(endpoint, request)
    }
}

/// Decides whether a request may proceed. May set [`Context::current_user`].
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, context: &mut Context) -> Result<(), Failure>;
}

impl<F> Authenticator for F
where
    F: Fn(&mut Context) -> Result<(), Failure> + Send + Sync,
{
    fn authenticate(&self, context: &mut Context) -> Result<(), Failure> {
        self(context)
    }
}

/// Lets every request through without a principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authenticate(&self, _context: &mut Context) -> Result<(), Failure> {
        Ok(())
    }
}

/// Path parameters a router attaches to a request as an extension.
#[derive(Debug, Clone, Default)]
pub struct RouteParams(pub HashMap<String, String>);

/// Context factory for [`http::Request<String>`].
///
/// Query parameters become list values (`?a=1&a=2` gives `["1", "2"]`) and a
/// JSON object body is merged over them.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpContextFactory;

impl ContextFactory<http::Request<String>> for HttpContextFactory {
    fn create(
        &self,
        endpoint: &Endpoint,
        request: http::Request<String>,
    ) -> Result<Context, Failure> {
        let (parts, body) = request.into_parts();
        let mut context = Context::new(endpoint.route());

        context.raw_args = query_args(parts.uri.query().unwrap_or(""));
        context.cookies = parse_cookies(&parts.headers);
        if let Some(params) = parts.extensions.get::<RouteParams>() {
            context.route_args = params.0.clone();
        }
        context.headers = parts.headers;

        if !body.is_empty() {
            if let Some(fields) = body_args(context.content_type(), &body)? {
                context.raw_args.extend(fields);
            }
            context.body = Some(body);
        }
        Ok(context)
    }
}

fn query_args(query: &str) -> Map<String, Value> {
    let mut args = Map::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let slot = args
            .entry(key.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = slot {
            values.push(Value::String(value.into_owned()));
        }
    }
    args
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn is_json(content_type: &str) -> bool {
    content_type == "application/json" || content_type.ends_with("+json")
}

/// Decode a body into argument fields.
///
/// A declared JSON body must parse; an undeclared one is used only if it
/// happens to be a JSON object.
fn body_args(content_type: Option<&str>, body: &str) -> Result<Option<Map<String, Value>>, Failure> {
    match content_type {
        Some(ct) if is_json(ct) => match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(fields)) => Ok(Some(fields)),
            Ok(_) => Ok(None),
            Err(e) => Err(ApiError::unprocessable_entity(format!("Invalid JSON body: {}", e)).into()),
        },
        None => match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(fields)) => Ok(Some(fields)),
            _ => Ok(None),
        },
        Some(_) => Ok(None),
    }
}
