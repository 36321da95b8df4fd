//! Endpoint declarations and the per-stage pipeline operations.

use std::fmt;
use std::sync::Arc;

use http::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, ORIGIN, VARY,
};
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Map, Value};

use crate::argument::Argument;
use crate::context::Context;
use crate::error::{ApiError, ArgumentError, Failure, SchemaError};
use crate::model::Model;
use crate::patch::ResourcePatch;
use crate::registrar::{Descriptor, SchemaTable};
use crate::render::Renderer;
use crate::resource::{ResourceRef, Returns};
use crate::types::{PipelineSettings, Response, JSON_CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE};

/// Context-mutating hook run before or after the handler.
pub type Hook = Arc<dyn Fn(&mut Context) -> Result<(), Failure> + Send + Sync>;

/// Hook run once the response exists.
pub type ResponseHook = Arc<dyn Fn(&Context, &mut Response) -> Result<(), Failure> + Send + Sync>;

/// Version-dependent renaming of raw arguments.
pub type ArgPatcher = Arc<dyn Fn(&Context, Map<String, Value>) -> Map<String, Value> + Send + Sync>;

pub type HandlerFn = Arc<dyn Fn(&mut Context) -> Result<Reply, Failure> + Send + Sync>;

pub type PatchHandlerFn =
    Arc<dyn Fn(&mut Context, ResourcePatch<'_>) -> Result<Reply, Failure> + Send + Sync>;

/// Body flavour accepted by patch-style endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    /// Partial update, `application/merge-patch+json`.
    Merge,
    /// Full replacement, `application/json`.
    Replace,
}

impl PatchMode {
    pub fn content_type(self) -> &'static str {
        match self {
            PatchMode::Merge => MERGE_PATCH_CONTENT_TYPE,
            PatchMode::Replace => JSON_CONTENT_TYPE,
        }
    }
}

#[derive(Clone)]
pub enum Handler {
    Plain(HandlerFn),
    /// Receives the request body as a patch bound to `resource`.
    Patch {
        resource: ResourceRef,
        mode: PatchMode,
        ignore_missing_fields: bool,
        handle: PatchHandlerFn,
    },
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Plain(_) => f.write_str("Plain(..)"),
            Handler::Patch {
                resource,
                mode,
                ignore_missing_fields,
                ..
            } => f
                .debug_struct("Patch")
                .field("resource", resource)
                .field("mode", mode)
                .field("ignore_missing_fields", ignore_missing_fields)
                .finish(),
        }
    }
}

/// Whether and how to stamp `Access-Control-Allow-Origin`.
#[derive(Clone, Default)]
pub enum CorsPolicy {
    #[default]
    Disabled,
    /// `*`
    AllowAll,
    /// Echo the request origin when it is listed.
    Origins(Vec<String>),
    /// Decide per request.
    Dynamic(Arc<dyn Fn(&Context) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for CorsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorsPolicy::Disabled => f.write_str("Disabled"),
            CorsPolicy::AllowAll => f.write_str("AllowAll"),
            CorsPolicy::Origins(origins) => f.debug_tuple("Origins").field(origins).finish(),
            CorsPolicy::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl CorsPolicy {
    /// Origin value to emit for this request, if any.
    pub fn allow_origin(&self, context: &Context) -> Option<String> {
        match self {
            CorsPolicy::Disabled => None,
            CorsPolicy::AllowAll => Some("*".to_string()),
            CorsPolicy::Origins(origins) => {
                let origin = context.headers.get(ORIGIN)?.to_str().ok()?;
                origins
                    .iter()
                    .any(|o| o == origin)
                    .then(|| origin.to_string())
            }
            CorsPolicy::Dynamic(decide) => decide(context),
        }
    }
}

/// What a handler produced, before rendering.
pub enum Payload {
    /// No body.
    Empty,
    One(Box<dyn Model>),
    Many(Vec<Box<dyn Model>>),
    /// `{key: rendered payload}`; each value rendered against the return resource.
    Keyed(Vec<(String, Payload)>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::One(_) => f.write_str("One(..)"),
            Payload::Many(items) => write!(f, "Many(len={})", items.len()),
            Payload::Keyed(entries) => f
                .debug_list()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
        }
    }
}

/// A handler's result: payload plus response status and headers.
#[derive(Debug)]
pub struct Reply {
    pub payload: Payload,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for Reply {
    fn default() -> Self {
        Self::new(Payload::Empty)
    }
}

impl Reply {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Payload::Empty)
    }

    pub fn one(model: impl Model) -> Self {
        Self::new(Payload::One(Box::new(model)))
    }

    pub fn many<M: Model>(models: impl IntoIterator<Item = M>) -> Self {
        Self::new(Payload::Many(
            models
                .into_iter()
                .map(|m| Box::new(m) as Box<dyn Model>)
                .collect(),
        ))
    }

    /// `{key: model}`.
    pub fn keyed(key: impl Into<String>, model: impl Model) -> Self {
        Self::new(Payload::Keyed(vec![(
            key.into(),
            Payload::One(Box::new(model)),
        )]))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// One request handler bound to a method, URI template and route name.
pub struct Endpoint {
    route: String,
    method: Method,
    uri: String,
    pub description: String,
    arguments: SchemaTable<Argument>,
    returns: Returns,
    before: Vec<Hook>,
    after: Vec<Hook>,
    after_response: Vec<ResponseHook>,
    cors: CorsPolicy,
    cache_control: Option<HeaderValue>,
    arg_patcher: Option<ArgPatcher>,
    handler: Handler,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("route", &self.route)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("arguments", &self.arguments.names().collect::<Vec<_>>())
            .field("returns", &self.returns)
            .field("hooks", &(self.before.len(), self.after.len(), self.after_response.len()))
            .field("cors", &self.cors)
            .field("handler", &self.handler)
            .finish()
    }
}

impl Endpoint {
    pub fn get(route: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        Self::builder(route, Method::GET, uri)
    }

    pub fn post(route: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        Self::builder(route, Method::POST, uri)
    }

    pub fn put(route: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        Self::builder(route, Method::PUT, uri)
    }

    pub fn patch(route: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        Self::builder(route, Method::PATCH, uri)
    }

    pub fn delete(route: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        Self::builder(route, Method::DELETE, uri)
    }

    pub fn builder(
        route: impl Into<String>,
        method: Method,
        uri: impl Into<String>,
    ) -> EndpointBuilder {
        EndpointBuilder::new(route.into(), method, uri.into())
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn arguments(&self) -> &SchemaTable<Argument> {
        &self.arguments
    }

    pub fn returns(&self) -> &Returns {
        &self.returns
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_ref().and_then(|v| v.to_str().ok())
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Step 3: version-dependent argument renaming; identity by default.
    pub fn patch_args(&self, context: &mut Context) {
        let raw = context.raw_args.clone();
        context.patched_args = match &self.arg_patcher {
            Some(patch) => patch(context, raw),
            None => raw,
        };
    }

    /// Step 4: validate every declared argument into `context.args`.
    ///
    /// A one-element list is unwrapped unless the argument takes lists.
    pub fn parse_args(&self, context: &mut Context) -> Result<(), ArgumentError> {
        let mut parsed = Map::new();
        for argument in &self.arguments {
            let raw = match context.patched_args.get(argument.name()) {
                Some(Value::Array(items)) if items.len() == 1 && !argument.accepts_list() => {
                    items.first()
                }
                other => other,
            };
            if let Some(value) = argument.validate(raw)? {
                parsed.insert(argument.name().to_string(), value);
            }
        }
        context.args = parsed;
        Ok(())
    }

    pub fn run_before(&self, context: &mut Context) -> Result<(), Failure> {
        self.before.iter().try_for_each(|hook| hook(context))
    }

    /// Step 6: invoke the handler.
    ///
    /// Patch handlers first check the body's content type (415 otherwise) and
    /// decode it into a [`ResourcePatch`].
    pub fn handle(&self, context: &mut Context) -> Result<Reply, Failure> {
        match &self.handler {
            Handler::Plain(handle) => handle(context),
            Handler::Patch {
                resource,
                mode,
                ignore_missing_fields,
                handle,
            } => {
                let expected = mode.content_type();
                if context.content_type() != Some(expected) {
                    return Err(ApiError::unsupported_media_type(format!(
                        "Expected Content-Type `{}`",
                        expected
                    ))
                    .into());
                }
                let resource = resource.resolve()?;
                let body = context.body.clone().unwrap_or_default();
                let patch = ResourcePatch::from_body(&body, &resource)?
                    .ignore_missing_fields(*ignore_missing_fields);
                handle(context, patch)
            }
        }
    }

    pub fn run_after(&self, context: &mut Context) -> Result<(), Failure> {
        self.after.iter().try_for_each(|hook| hook(context))
    }

    /// Step 8: render the reply and build the response.
    pub fn render(
        &self,
        context: &Context,
        reply: &Reply,
        settings: &PipelineSettings,
    ) -> Result<Response, Failure> {
        let renderer = Renderer::new(context, settings.max_render_depth);
        let body = match renderer.render_payload(&self.returns, &reply.payload)? {
            Some(value) => serde_json::to_string(&value).map_err(Failure::unclassified)?,
            None => String::new(),
        };

        let mut response = Response::json(reply.status, body);
        for (name, value) in &reply.headers {
            response.headers.append(name.clone(), value.clone());
        }
        if !response.headers.contains_key(CACHE_CONTROL) {
            if let Some(value) = self.cache_control.clone().or_else(|| {
                settings
                    .default_cache_control
                    .as_deref()
                    .and_then(|v| HeaderValue::from_str(v).ok())
            }) {
                response.headers.insert(CACHE_CONTROL, value);
            }
        }
        Ok(response)
    }

    /// Step 9: stamp the CORS header.
    pub fn apply_cors(&self, context: &Context, response: &mut Response) {
        let Some(origin) = self.cors.allow_origin(context) else {
            return;
        };
        match HeaderValue::from_str(&origin) {
            Ok(value) => {
                response.headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
                if origin != "*" {
                    response.headers.append(VARY, HeaderValue::from_static("Origin"));
                }
            }
            Err(_) => tracing::warn!(endpoint = %self.route, origin = %origin, "invalid CORS origin"),
        }
    }

    pub fn run_after_response(&self, context: &Context, response: &mut Response) -> Result<(), Failure> {
        self.after_response
            .iter()
            .try_for_each(|hook| hook(context, response))
    }
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    route: String,
    method: Method,
    uri: String,
    description: String,
    arguments: Vec<(String, Argument)>,
    returns: Option<Returns>,
    before: Vec<Hook>,
    after: Vec<Hook>,
    after_response: Vec<ResponseHook>,
    cors: CorsPolicy,
    cache_control: Option<String>,
    arg_patcher: Option<ArgPatcher>,
    handler: Option<HandlerSpec>,
    ignore_missing_fields: bool,
}

enum HandlerSpec {
    Plain(HandlerFn),
    Patch(ResourceRef, PatchHandlerFn),
}

impl EndpointBuilder {
    fn new(route: String, method: Method, uri: String) -> Self {
        Self {
            route,
            method,
            uri,
            description: String::new(),
            arguments: Vec::new(),
            returns: None,
            before: Vec::new(),
            after: Vec::new(),
            after_response: Vec::new(),
            cors: CorsPolicy::Disabled,
            cache_control: None,
            arg_patcher: None,
            handler: None,
            ignore_missing_fields: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn argument(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.arguments.push((name.into(), argument));
        self
    }

    /// Declared return. Defaults to no content.
    pub fn returns(mut self, returns: Returns) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn before(mut self, hook: impl Fn(&mut Context) -> Result<(), Failure> + Send + Sync + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after(mut self, hook: impl Fn(&mut Context) -> Result<(), Failure> + Send + Sync + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn after_response(
        mut self,
        hook: impl Fn(&Context, &mut Response) -> Result<(), Failure> + Send + Sync + 'static,
    ) -> Self {
        self.after_response.push(Arc::new(hook));
        self
    }

    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.cors = policy;
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn arg_patcher(
        mut self,
        patcher: impl Fn(&Context, Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.arg_patcher = Some(Arc::new(patcher));
        self
    }

    pub fn handler(
        mut self,
        handle: impl Fn(&mut Context) -> Result<Reply, Failure> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(HandlerSpec::Plain(Arc::new(handle)));
        self
    }

    /// Handle the body as a patch against `resource`.
    ///
    /// PUT endpoints take `application/json`; every other method takes
    /// `application/merge-patch+json`.
    pub fn patch_handler(
        mut self,
        resource: impl Into<ResourceRef>,
        handle: impl Fn(&mut Context, ResourcePatch<'_>) -> Result<Reply, Failure> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(HandlerSpec::Patch(resource.into(), Arc::new(handle)));
        self
    }

    /// Write unknown patch keys through instead of rejecting them.
    pub fn ignore_missing_fields(mut self) -> Self {
        self.ignore_missing_fields = true;
        self
    }

    /// Register the argument table and freeze the endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for invalid argument declarations, an invalid
    /// cache-control value, or a missing handler.
    pub fn build(self) -> Result<Endpoint, SchemaError> {
        let invalid = |name: &str, message: String| SchemaError::InvalidDeclaration {
            owner: self.route.clone(),
            name: name.to_string(),
            message,
        };
        if self.route.is_empty() {
            return Err(SchemaError::EmptyName {
                owner: "endpoint".to_string(),
            });
        }
        let cache_control = match &self.cache_control {
            Some(value) => Some(
                HeaderValue::from_str(value)
                    .map_err(|e| invalid("cache_control", e.to_string()))?,
            ),
            None => None,
        };
        let handler = match self.handler {
            Some(HandlerSpec::Plain(handle)) => Handler::Plain(handle),
            Some(HandlerSpec::Patch(resource, handle)) => Handler::Patch {
                resource,
                mode: if self.method == Method::PUT {
                    PatchMode::Replace
                } else {
                    PatchMode::Merge
                },
                ignore_missing_fields: self.ignore_missing_fields,
                handle,
            },
            None => {
                return Err(SchemaError::MissingHandler {
                    route: self.route.clone(),
                })
            }
        };
        let arguments = SchemaTable::register(&self.route, self.arguments)?;

        tracing::debug!(
            endpoint = %self.route,
            method = %self.method,
            uri = %self.uri,
            arguments = arguments.len(),
            "registered endpoint"
        );

        Ok(Endpoint {
            route: self.route,
            method: self.method,
            uri: self.uri,
            description: self.description,
            arguments,
            returns: self.returns.unwrap_or_else(Returns::no_content),
            before: self.before,
            after: self.after,
            after_response: self.after_response,
            cors: self.cors,
            cache_control,
            arg_patcher: self.arg_patcher,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Endpoint {
        Endpoint::get("echo", "/echo")
            .argument("n", Argument::integer("n").required())
            .argument("tags", Argument::string_list("tags"))
            .argument("note", Argument::string("note"))
            .handler(|_| Ok(Reply::empty()))
            .build()
            .unwrap()
    }

    #[test]
    fn missing_handler_is_rejected() {
        let err = Endpoint::get("nothing", "/nothing").build().unwrap_err();
        assert!(matches!(err, SchemaError::MissingHandler { route } if route == "nothing"));
    }

    #[test]
    fn reserved_argument_name_is_rejected() {
        let err = Endpoint::get("e", "/e")
            .argument("_hidden", Argument::string("x"))
            .handler(|_| Ok(Reply::empty()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn parse_args_unwraps_single_values() {
        let endpoint = echo();
        let mut context = Context::new("echo");
        context.raw_args.insert("n".into(), json!(["4"]));
        context.raw_args.insert("tags".into(), json!(["a b"]));
        endpoint.patch_args(&mut context);
        endpoint.parse_args(&mut context).unwrap();

        assert_eq!(context.args["n"], json!(4));
        assert_eq!(context.args["tags"], json!(["a", "b"]));
        assert!(!context.args.contains_key("note"));
    }

    #[test]
    fn parse_args_reports_first_failure() {
        let endpoint = echo();
        let mut context = Context::new("echo");
        endpoint.patch_args(&mut context);
        let err = endpoint.parse_args(&mut context).unwrap_err();
        assert_eq!(err.path, "n");
    }

    #[test]
    fn arg_patcher_renames() {
        let endpoint = Endpoint::get("e", "/e")
            .argument("count", Argument::integer("count"))
            .arg_patcher(|_, mut raw| {
                if let Some(v) = raw.remove("n") {
                    raw.insert("count".into(), v);
                }
                raw
            })
            .handler(|_| Ok(Reply::empty()))
            .build()
            .unwrap();
        let mut context = Context::new("e");
        context.raw_args.insert("n".into(), json!(["9"]));
        endpoint.patch_args(&mut context);
        endpoint.parse_args(&mut context).unwrap();
        assert_eq!(context.arg_i64("count"), Some(9));
    }

    #[test]
    fn patch_mode_follows_method() {
        let resource = crate::resource::Resource::builder("Thing", "thing")
            .field("a", crate::field::Field::string("a"))
            .build()
            .unwrap();
        let put = Endpoint::put("put", "/thing")
            .patch_handler(&resource, |_, _| Ok(Reply::empty()))
            .build()
            .unwrap();
        let patch = Endpoint::patch("patch", "/thing")
            .patch_handler(&resource, |_, _| Ok(Reply::empty()))
            .build()
            .unwrap();
        assert!(matches!(put.handler(), Handler::Patch { mode: PatchMode::Replace, .. }));
        assert!(matches!(patch.handler(), Handler::Patch { mode: PatchMode::Merge, .. }));
    }

    #[test]
    fn wrong_patch_content_type_is_415() {
        let resource = crate::resource::Resource::builder("Thing", "thing")
            .field("a", crate::field::Field::string("a"))
            .build()
            .unwrap();
        let endpoint = Endpoint::patch("patch", "/thing")
            .patch_handler(&resource, |_, _| Ok(Reply::empty()))
            .build()
            .unwrap();
        let mut context = Context::new("patch");
        context
            .headers
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        context.body = Some(r#"{"a": "x"}"#.into());
        let err = endpoint.handle(&mut context).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    #[test]
    fn cors_policies() {
        let mut context = Context::new("e");
        assert_eq!(CorsPolicy::Disabled.allow_origin(&context), None);
        assert_eq!(CorsPolicy::AllowAll.allow_origin(&context).as_deref(), Some("*"));

        let listed = CorsPolicy::Origins(vec!["https://a.example".into()]);
        assert_eq!(listed.allow_origin(&context), None);
        context
            .headers
            .insert(ORIGIN, HeaderValue::from_static("https://a.example"));
        assert_eq!(listed.allow_origin(&context).as_deref(), Some("https://a.example"));
        context
            .headers
            .insert(ORIGIN, HeaderValue::from_static("https://b.example"));
        assert_eq!(listed.allow_origin(&context), None);
    }

    #[test]
    fn invalid_cache_control_is_rejected() {
        let err = Endpoint::get("e", "/e")
            .cache_control("bad\nvalue")
            .handler(|_| Ok(Reply::empty()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDeclaration { .. }));
    }
}
