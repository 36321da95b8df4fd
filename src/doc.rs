//! Read-only documentation export for a built [`Api`].
//!
//! Two shapes are produced: a descriptive document listing every endpoint,
//! argument and field, and a JSON Schema (draft 2020-12) for the rendered
//! output of a resource.

use serde_json::{json, Map, Value};

use crate::api::Api;
use crate::endpoint::{Endpoint, Handler};
use crate::error::RenderError;
use crate::field::{Field, FieldType};
use crate::registrar::Descriptor;
use crate::resource::{Resource, ResourceKind, ResourceRef};

pub const JSON_SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Document every endpoint and resource of `api`.
pub fn document(api: &Api) -> Value {
    let endpoints: Map<String, Value> = api
        .endpoints()
        .map(|e| (e.route().to_string(), document_endpoint(e)))
        .collect();
    let resources: Vec<Value> = api.resources().map(|r| document_resource(r)).collect();
    json!({
        "endpoints": endpoints,
        "resources": resources,
    })
}

pub fn document_endpoint(endpoint: &Endpoint) -> Value {
    let arguments: Map<String, Value> = endpoint
        .arguments()
        .iter()
        .map(|argument| (argument.name().to_string(), argument.doc()))
        .collect();

    let mut doc = Map::new();
    doc.insert("name".into(), json!(endpoint.route()));
    doc.insert("method".into(), json!(endpoint.method().as_str()));
    doc.insert("uri".into(), json!(endpoint.uri()));
    doc.insert("description".into(), json!(endpoint.description));
    doc.insert("arguments".into(), Value::Object(arguments));
    doc.insert("returns".into(), endpoint.returns().doc());
    if let Handler::Patch {
        resource,
        mode,
        ignore_missing_fields,
        ..
    } = endpoint.handler()
    {
        doc.insert(
            "patch".into(),
            json!({
                "resource_name": resource.target_name(),
                "content_type": mode.content_type(),
                "ignore_missing_fields": ignore_missing_fields,
            }),
        );
    }
    if let Some(cache_control) = endpoint.cache_control() {
        doc.insert("cache_control".into(), json!(cache_control));
    }
    Value::Object(doc)
}

pub fn document_resource(resource: &Resource) -> Value {
    let kind = match resource.kind() {
        ResourceKind::Fields => "resource",
        ResourceKind::Debug => "debug",
        ResourceKind::NoContent => "no_content",
    };
    let fields: Map<String, Value> = resource
        .fields()
        .iter()
        .map(|field| (field.name().to_string(), field.doc()))
        .collect();
    json!({
        "name": resource.name(),
        "description": resource.description,
        "type": kind,
        "default_fields": resource.default_fields(),
        "fields": fields,
    })
}

/// JSON Schema describing what rendering `resource` can produce.
///
/// Every field is optional, since field overrides render subsets. Nested
/// resources live under `$defs` keyed by resource name, which also covers
/// self-referencing resources.
///
/// # Errors
///
/// Returns `RenderError::Unlinked` when a nested named reference has not
/// been linked.
pub fn resource_json_schema(resource: &Resource) -> Result<Value, RenderError> {
    let mut defs = Map::new();
    collect_defs(resource, &mut defs)?;
    Ok(json!({
        "$schema": JSON_SCHEMA_DIALECT,
        "title": resource.name(),
        "$ref": def_ref(resource.name()),
        "$defs": defs,
    }))
}

fn collect_defs(resource: &Resource, defs: &mut Map<String, Value>) -> Result<(), RenderError> {
    if defs.contains_key(resource.name()) {
        return Ok(());
    }
    let schema = match resource.kind() {
        ResourceKind::NoContent => json!({ "type": "null" }),
        ResourceKind::Debug => json!({}),
        ResourceKind::Fields => {
            // Placeholder first so cycles stop here.
            defs.insert(resource.name().to_string(), json!({}));
            let mut properties = Map::new();
            for field in resource.fields() {
                properties.insert(field.name().to_string(), field_schema(field, defs)?);
            }
            let mut schema = json!({
                "type": "object",
                "description": resource.description,
                "properties": properties,
            });
            if resource.post_render().is_none() {
                schema["additionalProperties"] = json!(false);
            }
            schema
        }
    };
    defs.insert(resource.name().to_string(), schema);
    Ok(())
}

fn field_schema(field: &Field, defs: &mut Map<String, Value>) -> Result<Value, RenderError> {
    let mut schema = type_schema(&field.value_type, defs)?;
    if !field.description.is_empty() {
        if let Value::Object(map) = &mut schema {
            map.insert("description".into(), json!(field.description));
        }
    }
    Ok(schema)
}

fn type_schema(value_type: &FieldType, defs: &mut Map<String, Value>) -> Result<Value, RenderError> {
    let schema = match value_type {
        FieldType::String | FieldType::Timestamp | FieldType::Url | FieldType::Decimal { .. } => {
            json!({ "type": ["string", "null"] })
        }
        FieldType::Integer => json!({ "type": ["integer", "null"] }),
        FieldType::Float => json!({ "type": ["number", "null"] }),
        FieldType::Boolean => json!({ "type": ["boolean", "null"] }),
        FieldType::Scope => json!({
            "type": ["string", "array", "null"],
            "items": { "type": "string" },
        }),
        FieldType::List { item } => {
            let mut schema = json!({ "type": "array" });
            if let Some(item) = item {
                schema["items"] = type_schema(item, defs)?;
            }
            schema
        }
        FieldType::Resource { target, .. } => json!({
            "anyOf": [{ "$ref": nested_ref(target, defs)? }, { "type": "null" }],
        }),
        FieldType::ResourceList { target, .. } => json!({
            "type": "array",
            "items": { "$ref": nested_ref(target, defs)? },
        }),
        FieldType::RelativeLinks { .. } => json!({
            "type": ["object", "null"],
            "additionalProperties": { "type": "string" },
        }),
        FieldType::Any => json!({}),
    };
    Ok(schema)
}

fn nested_ref(target: &ResourceRef, defs: &mut Map<String, Value>) -> Result<String, RenderError> {
    let resource = target.resolve()?;
    collect_defs(&resource, defs)?;
    Ok(def_ref(resource.name()))
}

fn def_ref(name: &str) -> String {
    format!("#/$defs/{}", name)
}
