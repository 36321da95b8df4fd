//! Walks backing objects through resource field tables.

use serde_json::{Map, Value};

use crate::context::Context;
use crate::endpoint::Payload;
use crate::error::RenderError;
use crate::field::{format_decimal, Field, FieldType};
use crate::model::{Attr, Model};
use crate::registrar::Descriptor;
use crate::resource::{Resource, ResourceKind, Returns};
use crate::types::json_type_name;

/// Renders models against resources for one request.
///
/// The request's [`Context`] is threaded through every nesting level so
/// post-render hooks see the same request state at any depth.
pub struct Renderer<'c> {
    context: &'c Context,
    max_depth: usize,
}

impl<'c> Renderer<'c> {
    pub fn new(context: &'c Context, max_depth: usize) -> Self {
        Self { context, max_depth }
    }

    /// Render `model` with `fields`, or the resource's default fields.
    pub fn render(
        &self,
        resource: &Resource,
        model: Option<&dyn Model>,
        fields: Option<&[String]>,
    ) -> Result<Value, RenderError> {
        self.render_at(resource, model, fields, 0)
    }

    /// Render a homogeneous list.
    pub fn render_many(
        &self,
        resource: &Resource,
        models: &[&dyn Model],
        fields: Option<&[String]>,
    ) -> Result<Value, RenderError> {
        models
            .iter()
            .map(|m| self.render_at(resource, Some(*m), fields, 0))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn render_at(
        &self,
        resource: &Resource,
        model: Option<&dyn Model>,
        fields: Option<&[String]>,
        depth: usize,
    ) -> Result<Value, RenderError> {
        if depth > self.max_depth {
            return Err(RenderError::DepthExceeded {
                max: self.max_depth,
            });
        }
        let Some(model) = model else {
            return Ok(Value::Null);
        };

        match resource.kind() {
            ResourceKind::NoContent => Ok(Value::Null),
            ResourceKind::Debug => model.snapshot().ok_or_else(|| RenderError::Opaque {
                resource: resource.name().to_string(),
            }),
            ResourceKind::Fields => {
                let names = fields.unwrap_or(resource.default_fields());
                let mut output = Map::new();
                for name in names {
                    let field = resource.field(name).ok_or_else(|| RenderError::UnknownField {
                        resource: resource.name().to_string(),
                        field: name.clone(),
                    })?;
                    output.insert(name.clone(), self.render_field(field, model, depth)?);
                }
                if let Some(hook) = resource.post_render() {
                    hook(model, self.context, &mut output);
                }
                Ok(Value::Object(output))
            }
        }
    }

    fn render_field(&self, field: &Field, model: &dyn Model, depth: usize) -> Result<Value, RenderError> {
        if let FieldType::RelativeLinks { generators } = &field.value_type {
            let links: Map<String, Value> = generators
                .iter()
                .filter_map(|g| g.call(model))
                .map(|(rel, url)| (rel, Value::String(url)))
                .collect();
            return Ok(if links.is_empty() {
                Value::Null
            } else {
                Value::Object(links)
            });
        }

        let attr = match &field.compute {
            Some(compute) => Attr::Value(compute.call(model)),
            None => model.attr(field.source_attribute()),
        };
        self.render_value(field.name(), &field.value_type, attr, depth)
    }

    fn render_value(
        &self,
        name: &str,
        value_type: &FieldType,
        attr: Attr<'_>,
        depth: usize,
    ) -> Result<Value, RenderError> {
        match value_type {
            FieldType::Resource { target, subfields } => {
                let target = target.resolve()?;
                let subfields = subfields.as_deref();
                match attr {
                    Attr::Missing | Attr::Value(Value::Null) => Ok(Value::Null),
                    Attr::Object(nested) => self.render_at(&target, Some(nested), subfields, depth + 1),
                    Attr::Value(value @ Value::Object(_)) => {
                        self.render_at(&target, Some(&value), subfields, depth + 1)
                    }
                    Attr::Value(other) => Err(shape(name, "an object", json_type_name(&other))),
                    Attr::List(_) => Err(shape(name, "an object", "array")),
                }
            }
            FieldType::ResourceList { target, subfields } => {
                let target = target.resolve()?;
                let subfields = subfields.as_deref();
                match attr {
                    Attr::Missing | Attr::Value(Value::Null) => Ok(Value::Array(Vec::new())),
                    Attr::List(items) => items
                        .into_iter()
                        .map(|m| self.render_at(&target, Some(m), subfields, depth + 1))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    Attr::Value(Value::Array(items)) => items
                        .iter()
                        .map(|v| {
                            let item = (!v.is_null()).then_some(v as &dyn Model);
                            self.render_at(&target, item, subfields, depth + 1)
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    Attr::Value(other) => Err(shape(name, "a list", json_type_name(&other))),
                    Attr::Object(_) => Err(shape(name, "a list", "object")),
                }
            }
            FieldType::List { item } => match attr {
                Attr::Missing | Attr::Value(Value::Null) => Ok(Value::Array(Vec::new())),
                Attr::Value(Value::Array(items)) => match item {
                    Some(item) => items
                        .into_iter()
                        .map(|v| self.render_value(name, item, Attr::Value(v), depth))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    None => Ok(Value::Array(items)),
                },
                Attr::List(models) => match item.as_deref() {
                    Some(item_type) => models
                        .into_iter()
                        .map(|m| self.render_value(name, item_type, Attr::Object(m), depth))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    None => Ok(Attr::List(models).into_value()),
                },
                Attr::Value(other) => Err(shape(name, "a list", json_type_name(&other))),
                Attr::Object(_) => Err(shape(name, "a list", "object")),
            },
            FieldType::Decimal { places, prefix } => {
                let raw = match attr.into_value() {
                    Value::Null => return Ok(Value::Null),
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s,
                    other => return Err(shape(name, "a decimal", json_type_name(&other))),
                };
                let text = format_decimal(&raw, *places).ok_or(RenderError::Shape {
                    field: name.to_string(),
                    expected: "a decimal",
                    actual: "string",
                })?;
                Ok(Value::String(format!("{}{}", prefix, text)))
            }
            _ => Ok(attr.into_value()),
        }
    }

    /// Render a handler payload against an endpoint's declared return.
    ///
    /// `None` means the response has no body.
    pub fn render_payload(&self, returns: &Returns, payload: &Payload) -> Result<Option<Value>, RenderError> {
        let target = returns.target.resolve()?;
        if target.is_no_content() {
            return Ok(None);
        }
        let fields = returns.fields.as_deref();

        match payload {
            Payload::Empty => Ok(None),
            Payload::One(model) if returns.many => match model.snapshot() {
                Some(Value::Array(items)) => {
                    let models: Vec<&dyn Model> = items.iter().map(|v| v as &dyn Model).collect();
                    self.render_many(&target, &models, fields).map(Some)
                }
                _ => Err(shape("<payload>", "a list", "object")),
            },
            Payload::One(model) => self.render(&target, Some(&**model), fields).map(Some),
            Payload::Many(models) => {
                let models: Vec<&dyn Model> = models.iter().map(|m| &**m).collect();
                self.render_many(&target, &models, fields).map(Some)
            }
            Payload::Keyed(entries) => {
                let mut output = Map::new();
                for (key, inner) in entries {
                    let rendered = self.render_payload(returns, inner)?.unwrap_or(Value::Null);
                    output.insert(key.clone(), rendered);
                }
                Ok(Some(Value::Object(output)))
            }
        }
    }
}

fn shape(field: &str, expected: &'static str, actual: &'static str) -> RenderError {
    RenderError::Shape {
        field: field.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use serde_json::json;
    use std::sync::Arc;

    fn point() -> Arc<Resource> {
        Resource::builder("Point", "a point")
            .field("x", Field::integer("x"))
            .field("y", Field::integer("y"))
            .field("label", Field::string("label").property("name"))
            .default_fields(&["x", "y"])
            .build()
            .unwrap()
    }

    #[test]
    fn renders_default_fields_only() {
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let model = json!({"x": 1, "y": 2, "name": "origin"});
        let out = renderer.render(&point(), Some(&model), None).unwrap();
        assert_eq!(out, json!({"x": 1, "y": 2}));
    }

    #[test]
    fn field_override_and_property() {
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let model = json!({"x": 1, "y": 2, "name": "origin"});
        let fields = vec!["label".to_string()];
        let out = renderer.render(&point(), Some(&model), Some(&fields)).unwrap();
        assert_eq!(out, json!({"label": "origin"}));
    }

    #[test]
    fn none_model_is_null() {
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        assert_eq!(renderer.render(&point(), None, None).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_override_field_fails() {
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let fields = vec!["z".to_string()];
        let err = renderer
            .render(&point(), Some(&json!({})), Some(&fields))
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownField { .. }));
    }

    #[test]
    fn decimal_fields() {
        let price = Resource::builder("Price", "price")
            .field("amount", Field::decimal("amount").places(2).prefix("$"))
            .build()
            .unwrap();
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let out = renderer
            .render(&price, Some(&json!({"amount": 12.5})), None)
            .unwrap();
        assert_eq!(out, json!({"amount": "$12.50"}));
        let out = renderer
            .render(&price, Some(&json!({"amount": null})), None)
            .unwrap();
        assert_eq!(out, json!({"amount": null}));
    }

    #[test]
    fn relative_links() {
        let linked = Resource::builder("Linked", "linked")
            .field(
                "rel",
                Field::relative_links("links")
                    .link(|m| {
                        m.attr("id")
                            .into_value()
                            .as_i64()
                            .map(|id| ("self".to_string(), format!("/things/{}", id)))
                    })
                    .link(|_| None),
            )
            .build()
            .unwrap();
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let out = renderer.render(&linked, Some(&json!({"id": 3})), None).unwrap();
        assert_eq!(out, json!({"rel": {"self": "/things/3"}}));
        let out = renderer.render(&linked, Some(&json!({})), None).unwrap();
        assert_eq!(out, json!({"rel": null}));
    }

    #[test]
    fn depth_limit_stops_runaway_nesting() {
        let node = Resource::builder("Node", "node")
            .field("next", Field::resource("next", "Node"))
            .build()
            .unwrap();
        let mut registry = crate::resource::ResourceRegistry::new();
        registry.register(&node).unwrap();
        registry.link().unwrap();

        let mut model = json!(null);
        for _ in 0..10 {
            model = json!({"next": model});
        }
        let context = Context::default();
        assert!(Renderer::new(&context, 20).render(&node, Some(&model), None).is_ok());
        let err = Renderer::new(&context, 3)
            .render(&node, Some(&model), None)
            .unwrap_err();
        assert_eq!(err, RenderError::DepthExceeded { max: 3 });
    }

    #[test]
    fn debug_resource_passes_through() {
        let debug = Resource::debug("Debug", "raw");
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let model = json!({"anything": [1, 2, 3]});
        assert_eq!(renderer.render(&debug, Some(&model), None).unwrap(), model);
    }

    #[test]
    fn payload_variants() {
        let context = Context::default();
        let renderer = Renderer::new(&context, 8);
        let returns = Returns::one("a point", point());

        assert_eq!(renderer.render_payload(&returns, &Payload::Empty).unwrap(), None);

        let keyed = Payload::Keyed(vec![(
            "point".to_string(),
            Payload::One(Box::new(json!({"x": 1, "y": 2}))),
        )]);
        assert_eq!(
            renderer.render_payload(&returns, &keyed).unwrap(),
            Some(json!({"point": {"x": 1, "y": 2}}))
        );

        let many = Returns::many("points", point());
        let payload = Payload::One(Box::new(json!([{"x": 1, "y": 1}])));
        assert_eq!(
            renderer.render_payload(&many, &payload).unwrap(),
            Some(json!([{"x": 1, "y": 1}]))
        );

        let none = Returns::no_content();
        let payload = Payload::One(Box::new(json!({"x": 1})));
        assert_eq!(renderer.render_payload(&none, &payload).unwrap(), None);
    }
}
