//! API Schema
//!
//! Declarative argument, resource and patch schemas for JSON HTTP endpoints.
//!
//! An [`Endpoint`] declares its arguments, its return [`Resource`] and a
//! handler. A [`Pipeline`] runs it for one request: create the [`Context`],
//! authenticate, validate arguments, run hooks and the handler, render the
//! payload through the resource's field table, and map every classified
//! failure to a `{"error": ...}` response.
//!
//! # Example
//!
//! ```
//! use api_schema::{Api, Argument, Endpoint, Field, Pipeline, Reply, Resource, Returns};
//! use api_schema::{Anonymous, HttpContextFactory};
//! use serde_json::json;
//!
//! let point = Resource::builder("Point", "a point")
//!     .field("x", Field::integer("x"))
//!     .field("y", Field::integer("y"))
//!     .build()
//!     .unwrap();
//!
//! let endpoint = Endpoint::get("origin", "/origin")
//!     .argument("scale", Argument::integer("multiplier").default(1))
//!     .returns(Returns::one("the origin", &point))
//!     .handler(|ctx| {
//!         let scale = ctx.arg_i64("scale").unwrap_or(1);
//!         Ok(Reply::one(json!({"x": 0, "y": scale})))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let api = Api::builder().endpoint(endpoint).build().unwrap();
//! let pipeline = Pipeline::builder()
//!     .context_factory(HttpContextFactory)
//!     .authenticator(Anonymous)
//!     .build()
//!     .unwrap();
//!
//! let request = http::Request::builder()
//!     .uri("/origin?scale=3")
//!     .body(String::new())
//!     .unwrap();
//! let response = pipeline.execute(api.endpoint("origin").unwrap(), request).unwrap();
//! assert_eq!(response.json_body().unwrap(), json!({"x": 0, "y": 3}));
//! ```
//!
//! # Failure Mapping
//!
//! | Failure | Status |
//! |---------|--------|
//! | `AuthenticationError` | 403 |
//! | `ArgumentError` | 422 |
//! | `ApiError` | its own status |
//! | `RaisedResponse` | its own status, headers and body |
//! | unclassified | returned as `PipelineError` |

mod api;
mod argument;
mod context;
pub mod demo;
mod doc;
mod endpoint;
mod error;
mod field;
mod linter;
mod loader;
mod model;
mod patch;
mod pipeline;
mod registrar;
mod render;
mod resource;
mod types;
mod validator;

pub use api::{Api, ApiBuilder};
pub use argument::{Argument, ArgumentKind};
pub use context::{Anonymous, Authenticator, Context, ContextFactory, HttpContextFactory, RouteParams};
pub use doc::{document, document_endpoint, document_resource, resource_json_schema};
pub use endpoint::{
    CorsPolicy, Endpoint, EndpointBuilder, Handler, PatchMode, Payload, Reply,
};
pub use error::{
    ApiError, ArgumentError, AuthenticationError, CheckError, Failure, LoadError, PipelineError,
    RaisedResponse, RenderError, SchemaError, Violation, DEFAULT_DENIAL,
};
pub use field::{format_decimal, Compute, Field, FieldType, LinkGenerator};
pub use linter::{lint, Diagnostic, LintResult, Severity, TargetKind, TargetResult, TargetStatus};
pub use loader::{is_url, load_payload, load_payload_auto, load_payload_str, read_text};
pub use model::{Assign, Attr, Model};
pub use patch::ResourcePatch;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registrar::{Descriptor, SchemaTable, RESERVED_PREFIX};
pub use render::Renderer;
pub use resource::{
    Resource, ResourceBuilder, ResourceKind, ResourceRef, ResourceRegistry, Returns,
    UnderlyingModel, NO_CONTENT,
};
pub use types::{
    json_type_name, PipelineSettings, Response, DEFAULT_MAX_RENDER_DEPTH, JSON_CONTENT_TYPE,
    MERGE_PATCH_CONTENT_TYPE,
};
pub use validator::{validate_against_schema, validate_rendered};

#[cfg(feature = "remote")]
pub use loader::load_payload_url;
