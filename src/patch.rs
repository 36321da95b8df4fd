//! Merge-patch application against resource schemas.
//!
//! A [`ResourcePatch`] validates and re-types a partial JSON document with
//! the same field tables used for rendering, then writes it into either a
//! plain JSON map or a live [`Model`]. Nested objects are merged
//! recursively; lists are always replaced whole.

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::field::{format_decimal, Field, FieldType};
use crate::model::{Assign, Model};
use crate::resource::Resource;
use crate::types::json_type_name;

/// A partial update bound to one resource.
#[derive(Debug, Clone)]
pub struct ResourcePatch<'r> {
    patch: Map<String, Value>,
    resource: &'r Resource,
    ignore_missing_fields: bool,
}

impl<'r> ResourcePatch<'r> {
    pub fn new(patch: Map<String, Value>, resource: &'r Resource) -> Self {
        Self {
            patch,
            resource,
            ignore_missing_fields: false,
        }
    }

    /// # Errors
    ///
    /// Returns a 422 `ApiError` when `value` is not a JSON object.
    pub fn from_value(value: Value, resource: &'r Resource) -> Result<Self, ApiError> {
        match value {
            Value::Object(patch) => Ok(Self::new(patch, resource)),
            other => Err(ApiError::unprocessable_entity(format!(
                "Patch body must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Decode a request body.
    ///
    /// # Errors
    ///
    /// Returns a 422 `ApiError` for malformed JSON or a non-object document.
    pub fn from_body(body: &str, resource: &'r Resource) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ApiError::unprocessable_entity(format!("Invalid JSON body: {}", e)))?;
        Self::from_value(value, resource)
    }

    /// Write undeclared keys through instead of rejecting them.
    pub fn ignore_missing_fields(mut self, ignore: bool) -> Self {
        self.ignore_missing_fields = ignore;
        self
    }

    pub fn resource(&self) -> &'r Resource {
        self.resource
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.patch
    }

    /// Apply to a plain map, keyed by field name.
    ///
    /// # Errors
    ///
    /// Returns a 422 `ApiError` naming the first unexpected or mistyped
    /// field. The target may be partially updated in that case.
    ///
    /// Computed fields have no reverse cast, so their values are stored
    /// as given.
    pub fn apply_to_dict(&self, target: &mut Map<String, Value>) -> Result<(), ApiError> {
        self.apply_dict_at(target, "")
    }

    /// Apply to a live model, keyed by source attribute.
    ///
    /// Nested objects are merged into existing children when the model
    /// exposes them; otherwise a fresh child is built through the nested
    /// resource's underlying model, or written as plain JSON.
    ///
    /// Computed fields have no attribute to write and are skipped.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePatch::apply_to_dict`], plus any error the model
    /// raises on write.
    pub fn apply_to_model(&self, target: &mut dyn Model) -> Result<(), ApiError> {
        self.apply_model_at(target, "")
    }

    fn nested<'a>(&self, patch: &Map<String, Value>, resource: &'a Resource) -> ResourcePatch<'a> {
        ResourcePatch {
            patch: patch.clone(),
            resource,
            ignore_missing_fields: self.ignore_missing_fields,
        }
    }

    /// Look up `key`, or decide it is an ignorable unknown.
    fn declared(&self, key: &str, path: &str) -> Result<Option<&'r Field>, ApiError> {
        let resource: &'r Resource = self.resource;
        if resource.is_debug() {
            return Ok(None);
        }
        match resource.field(key) {
            Some(field) => Ok(Some(field)),
            None if self.ignore_missing_fields => Ok(None),
            None => Err(ApiError::unexpected_field(path)),
        }
    }

    fn apply_dict_at(&self, target: &mut Map<String, Value>, prefix: &str) -> Result<(), ApiError> {
        for (key, value) in &self.patch {
            let path = join(prefix, key);
            let Some(field) = self.declared(key, &path)? else {
                target.insert(key.clone(), value.clone());
                continue;
            };
            if field.is_computed() {
                target.insert(key.clone(), value.clone());
                continue;
            }

            match (&field.value_type, value) {
                (FieldType::Resource { target: reference, .. }, Value::Object(nested)) => {
                    let resource = resolve(reference, &path)?;
                    let patch = self.nested(nested, &resource);
                    let slot = target
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Value::Object(existing) = slot {
                        patch.apply_dict_at(existing, &path)?;
                    }
                }
                _ => {
                    let cast = self.cast(field, value, &path)?;
                    target.insert(key.clone(), cast);
                }
            }
        }
        Ok(())
    }

    fn apply_model_at(&self, target: &mut dyn Model, prefix: &str) -> Result<(), ApiError> {
        for (key, value) in &self.patch {
            let path = join(prefix, key);
            let Some(field) = self.declared(key, &path)? else {
                target.set_attr(key, Assign::Value(value.clone()))?;
                continue;
            };
            if field.is_computed() {
                tracing::debug!(field = %path, "skipping computed field on model patch");
                continue;
            }
            let attr = field.source_attribute();

            match (&field.value_type, value) {
                (FieldType::Resource { target: reference, .. }, Value::Object(nested)) => {
                    let resource = resolve(reference, &path)?;
                    let patch = self.nested(nested, &resource);
                    if let Some(child) = target.child_mut(attr) {
                        patch.apply_model_at(child, &path)?;
                        continue;
                    }
                    let assign = self.construct(&resource, nested, &path)?;
                    target.set_attr(attr, assign)?;
                }
                (FieldType::ResourceList { target: reference, .. }, Value::Array(items)) => {
                    let resource = resolve(reference, &path)?;
                    let assign = match resource.underlying_model() {
                        Some(_) => {
                            let mut models = Vec::with_capacity(items.len());
                            for (i, item) in items.iter().enumerate() {
                                let item_path = format!("{}[{}]", path, i);
                                let Value::Object(nested) = item else {
                                    return Err(mismatch(&item_path, "an object", item));
                                };
                                match self.construct(&resource, nested, &item_path)? {
                                    Assign::Model(model) => models.push(model),
                                    _ => return Err(mismatch(&item_path, "an object", item)),
                                }
                            }
                            Assign::Models(models)
                        }
                        None => Assign::Value(self.cast(field, value, &path)?),
                    };
                    target.set_attr(attr, assign)?;
                }
                _ => {
                    let cast = self.cast(field, value, &path)?;
                    target.set_attr(attr, Assign::Value(cast))?;
                }
            }
        }
        Ok(())
    }

    /// Build a fresh nested value from a patch object.
    fn construct(
        &self,
        resource: &Resource,
        nested: &Map<String, Value>,
        path: &str,
    ) -> Result<Assign, ApiError> {
        let fields = self.cast_object(resource, nested, path)?;
        match resource.underlying_model() {
            Some(underlying) => {
                // Constructors take attribute names, not field names.
                let renamed: Map<String, Value> = fields
                    .into_iter()
                    .filter_map(|(k, v)| match resource.field(&k) {
                        Some(field) if field.is_computed() => None,
                        Some(field) => Some((field.source_attribute().to_string(), v)),
                        None => Some((k, v)),
                    })
                    .collect();
                let model = (underlying.construct)(Value::Object(renamed)).map_err(|e| {
                    ApiError::unprocessable_entity(format!(
                        "Field `{}` cannot build {}: {}",
                        path, underlying.type_name, e
                    ))
                })?;
                Ok(Assign::Model(model))
            }
            None => Ok(Assign::Value(Value::Object(fields))),
        }
    }

    /// Validate a nested object against `resource` into a fresh map.
    fn cast_object(
        &self,
        resource: &Resource,
        nested: &Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, ApiError> {
        let patch = self.nested(nested, resource);
        let mut fresh = Map::new();
        patch.apply_dict_at(&mut fresh, path)?;
        Ok(fresh)
    }

    /// Re-type a whole value for `field`.
    fn cast(&self, field: &Field, value: &Value, path: &str) -> Result<Value, ApiError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &field.value_type {
            FieldType::Resource { target, .. } => match value {
                Value::Object(nested) => {
                    let resource = resolve(target, path)?;
                    self.cast_object(&resource, nested, path).map(Value::Object)
                }
                other => Err(mismatch(path, "an object", other)),
            },
            FieldType::ResourceList { target, .. } => {
                let Value::Array(items) = value else {
                    return Err(mismatch(path, "a list", value));
                };
                let resource = resolve(target, path)?;
                let mut cast = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    match item {
                        Value::Object(nested) => {
                            cast.push(Value::Object(self.cast_object(&resource, nested, &item_path)?))
                        }
                        other => return Err(mismatch(&item_path, "an object", other)),
                    }
                }
                Ok(Value::Array(cast))
            }
            FieldType::List { item } => {
                let Value::Array(items) = value else {
                    return Err(mismatch(path, "a list", value));
                };
                match item.as_deref() {
                    Some(item_type) => items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| cast_scalar(item_type, v, &format!("{}[{}]", path, i)))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    None => Ok(value.clone()),
                }
            }
            other => cast_scalar(other, value, path),
        }
    }
}

/// Reverse cast for scalar field types. Types without one pass through.
fn cast_scalar(value_type: &FieldType, value: &Value, path: &str) -> Result<Value, ApiError> {
    let ok = match value_type {
        _ if value.is_null() => true,
        FieldType::String | FieldType::Timestamp | FieldType::Url => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Scope => {
            value.is_string()
                || value
                    .as_array()
                    .map_or(false, |items| items.iter().all(Value::is_string))
        }
        FieldType::Decimal { prefix, .. } => match value {
            Value::Number(_) => true,
            Value::String(text) => {
                let digits = text.strip_prefix(prefix.as_str()).unwrap_or(text);
                return match format_decimal(digits, None) {
                    Some(normal) => Ok(Value::String(normal)),
                    None => Err(mismatch(path, "a number", value)),
                };
            }
            _ => false,
        },
        FieldType::List { .. } | FieldType::Resource { .. } | FieldType::ResourceList { .. } => {
            return Err(ApiError::unprocessable_entity(format!(
                "Field `{}` cannot hold nested collections",
                path
            )));
        }
        FieldType::RelativeLinks { .. } | FieldType::Any => true,
    };
    if ok {
        Ok(value.clone())
    } else {
        Err(mismatch(path, expected_name(value_type), value))
    }
}

fn expected_name(value_type: &FieldType) -> &'static str {
    match value_type {
        FieldType::Integer => "an integer",
        FieldType::Float | FieldType::Decimal { .. } => "a number",
        FieldType::Boolean => "a boolean",
        FieldType::Scope => "a string or list of strings",
        _ => "a string",
    }
}

fn mismatch(path: &str, expected: &str, actual: &Value) -> ApiError {
    ApiError::unprocessable_entity(format!(
        "Field `{}` expected {}, got {}",
        path,
        expected,
        json_type_name(actual)
    ))
}

fn resolve(
    reference: &crate::resource::ResourceRef,
    path: &str,
) -> Result<std::sync::Arc<Resource>, ApiError> {
    reference.resolve().map_err(|e| {
        tracing::error!(field = path, error = %e, "patch hit an unlinked resource");
        ApiError::internal(e.to_string())
    })
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resources() -> std::sync::Arc<Resource> {
        let stats = Resource::builder("Stats", "stats")
            .field("logins", Field::integer("logins"))
            .build()
            .unwrap();
        Resource::builder("Account", "account")
            .field("username", Field::string("username"))
            .field("stats", Field::resource("stats", stats))
            .field("tokens", Field::list("tokens").item(FieldType::String))
            .field("shout", Field::string("shout").compute(|_| json!("HI")))
            .field("balance", Field::decimal("balance").places(2).prefix("$"))
            .build()
            .unwrap()
    }

    #[test]
    fn merges_nested_objects_in_dicts() {
        let account = resources();
        let mut target = json!({"username": "a", "stats": {"logins": 1, "extra": true}})
            .as_object()
            .cloned()
            .unwrap();
        let patch = ResourcePatch::from_value(json!({"stats": {"logins": 5}}), &account).unwrap();
        patch.apply_to_dict(&mut target).unwrap();
        assert_eq!(target["stats"], json!({"logins": 5, "extra": true}));
        assert_eq!(target["username"], "a");
    }

    #[test]
    fn replaces_lists_whole() {
        let account = resources();
        let mut target = json!({"tokens": ["a", "b", "c"]}).as_object().cloned().unwrap();
        let patch = ResourcePatch::from_value(json!({"tokens": ["z"]}), &account).unwrap();
        patch.apply_to_dict(&mut target).unwrap();
        assert_eq!(target["tokens"], json!(["z"]));
    }

    #[test]
    fn rejects_unknown_fields_unless_ignored() {
        let account = resources();
        let mut target = Map::new();
        let patch = ResourcePatch::from_value(json!({"bogus": 1}), &account).unwrap();
        let err = patch.apply_to_dict(&mut target).unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.message.contains("bogus"));

        patch.clone().ignore_missing_fields(true).apply_to_dict(&mut target).unwrap();
        assert_eq!(target["bogus"], json!(1));
    }

    #[test]
    fn nested_errors_carry_a_path() {
        let account = resources();
        let mut target = Map::new();
        let patch = ResourcePatch::from_value(json!({"stats": {"logins": "many"}}), &account).unwrap();
        let err = patch.apply_to_dict(&mut target).unwrap_err();
        assert!(err.message.contains("stats.logins"), "{}", err.message);
    }

    #[test]
    fn rejects_type_mismatches() {
        let account = resources();
        let mut target = Map::new();
        for bad in [json!({"username": 3}), json!({"tokens": "a"}), json!({"tokens": [1]})] {
            let patch = ResourcePatch::from_value(bad, &account).unwrap();
            assert!(patch.apply_to_dict(&mut target).is_err());
        }
    }

    #[test]
    fn computed_fields_pass_through() {
        let account = resources();
        let patch =
            ResourcePatch::from_value(json!({"shout": "no", "username": "b"}), &account).unwrap();

        let mut target = Map::new();
        patch.apply_to_dict(&mut target).unwrap();
        assert_eq!(target["shout"], "no");

        let mut model = json!({"username": "a"});
        patch.apply_to_model(&mut model).unwrap();
        assert_eq!(model, json!({"username": "b"}));
    }

    #[test]
    fn decimals_accept_rendered_text() {
        let account = resources();
        let mut target = Map::new();
        for (input, stored) in [
            (json!("$12.50"), json!("12.50")),
            (json!("7.125"), json!("7.125")),
            (json!(3.5), json!(3.5)),
        ] {
            let patch = ResourcePatch::from_value(json!({"balance": input}), &account).unwrap();
            patch.apply_to_dict(&mut target).unwrap();
            assert_eq!(target["balance"], stored);
        }

        for bad in [json!("$lots"), json!("12.5$"), json!(true)] {
            let patch = ResourcePatch::from_value(json!({"balance": bad}), &account).unwrap();
            let err = patch.apply_to_dict(&mut target).unwrap_err();
            assert!(err.message.contains("expected a number"), "{}", err.message);
        }
    }

    #[test]
    fn null_is_written() {
        let account = resources();
        let mut target = json!({"username": "a"}).as_object().cloned().unwrap();
        let patch = ResourcePatch::from_value(json!({"username": null}), &account).unwrap();
        patch.apply_to_dict(&mut target).unwrap();
        assert_eq!(target["username"], Value::Null);
    }

    #[test]
    fn body_must_be_an_object() {
        let account = resources();
        assert!(ResourcePatch::from_body("[1, 2]", &account).is_err());
        assert!(ResourcePatch::from_body("{not json", &account).is_err());
        assert!(ResourcePatch::from_body(r#"{"username": "b"}"#, &account).is_ok());
    }

    #[test]
    fn applies_to_json_models() {
        let account = resources();
        let mut model = json!({"username": "a", "stats": {"logins": 0}});
        let patch = ResourcePatch::from_value(
            json!({"username": "b", "stats": {"logins": 2}}),
            &account,
        )
        .unwrap();
        patch.apply_to_model(&mut model).unwrap();
        assert_eq!(model, json!({"username": "b", "stats": {"logins": 2}}));
    }
}
