//! Backing-object abstraction shared by the renderer and the patch engine.
//!
//! A [`Model`] exposes named attributes. The renderer reads them through
//! [`Model::attr`]; the patch engine writes them through [`Model::set_attr`]
//! and descends into nested objects through [`Model::child_mut`].
//!
//! `serde_json::Value` implements `Model`, so plain JSON maps can be rendered
//! and patched without any extra code.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

/// Upcast helper so boxed models can be downcast back to their concrete type.
pub trait AsAny: Any {
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A backing object that resources can render and patches can mutate.
pub trait Model: AsAny {
    /// Read an attribute by name.
    fn attr(&self, name: &str) -> Attr<'_>;

    /// Write an attribute by name.
    ///
    /// The default implementation rejects every write, which makes the model
    /// read-only from the patch engine's point of view.
    fn set_attr(&mut self, name: &str, value: Assign) -> Result<(), ApiError> {
        let _ = value;
        Err(ApiError::unprocessable_entity(format!(
            "Field `{}` is read-only",
            name
        )))
    }

    /// Borrow a nested model mutably, for in-place merge patching.
    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Model> {
        let _ = name;
        None
    }

    /// Verbatim JSON view, used by debug resources.
    fn snapshot(&self) -> Option<Value> {
        None
    }
}

/// The result of reading one attribute of a [`Model`].
pub enum Attr<'a> {
    /// The model has no such attribute.
    Missing,
    /// A plain JSON value.
    Value(Value),
    /// A nested model.
    Object(&'a dyn Model),
    /// A list of nested models.
    List(Vec<&'a dyn Model>),
}

impl<'a> Attr<'a> {
    /// Missing attributes and JSON nulls are both "no value".
    pub fn is_absent(&self) -> bool {
        matches!(self, Attr::Missing | Attr::Value(Value::Null))
    }

    /// Collapse to JSON. Nested models fall back to their snapshot.
    pub fn into_value(self) -> Value {
        match self {
            Attr::Missing => Value::Null,
            Attr::Value(value) => value,
            Attr::Object(model) => model.snapshot().unwrap_or(Value::Null),
            Attr::List(models) => Value::Array(
                models
                    .into_iter()
                    .map(|m| m.snapshot().unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }
}

impl<'a> From<Value> for Attr<'a> {
    fn from(value: Value) -> Self {
        Attr::Value(value)
    }
}

/// A value the patch engine writes into a [`Model`].
pub enum Assign {
    /// Cast JSON value.
    Value(Value),
    /// A nested model built through the resource's underlying-model constructor.
    Model(Box<dyn Model>),
    /// A list of constructed nested models.
    Models(Vec<Box<dyn Model>>),
}

impl std::fmt::Debug for Assign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assign::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Assign::Model(_) => f.write_str("Model(..)"),
            Assign::Models(models) => write!(f, "Models(len={})", models.len()),
        }
    }
}

impl Assign {
    /// Collapse to JSON, snapshotting any constructed models.
    pub fn into_value(self) -> Value {
        match self {
            Assign::Value(value) => value,
            Assign::Model(model) => model.snapshot().unwrap_or(Value::Null),
            Assign::Models(models) => Value::Array(
                models
                    .into_iter()
                    .map(|m| m.snapshot().unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// Take a nested model of concrete type `T`.
    ///
    /// Constructed models are downcast; plain JSON values are deserialized.
    ///
    /// # Errors
    ///
    /// Returns a 422 `ApiError` naming `attr` when the value has the wrong shape.
    pub fn into_model<T: Model + DeserializeOwned>(self, attr: &str) -> Result<T, ApiError> {
        match self {
            Assign::Model(model) => downcast(model, attr),
            Assign::Value(value) => from_value(value, attr),
            Assign::Models(_) => Err(shape_error(attr, "an object", "a list")),
        }
    }

    /// Like [`Assign::into_model`], but `null` clears the attribute.
    pub fn into_optional_model<T: Model + DeserializeOwned>(
        self,
        attr: &str,
    ) -> Result<Option<T>, ApiError> {
        match self {
            Assign::Value(Value::Null) => Ok(None),
            other => other.into_model(attr).map(Some),
        }
    }

    /// Take a list of nested models of concrete type `T`.
    pub fn into_models<T: Model + DeserializeOwned>(self, attr: &str) -> Result<Vec<T>, ApiError> {
        match self {
            Assign::Models(models) => models.into_iter().map(|m| downcast(m, attr)).collect(),
            Assign::Value(Value::Null) => Ok(Vec::new()),
            Assign::Value(value) => from_value(value, attr),
            Assign::Model(_) => Err(shape_error(attr, "a list", "an object")),
        }
    }
}

fn downcast<T: Model>(model: Box<dyn Model>, attr: &str) -> Result<T, ApiError> {
    model
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            ApiError::unprocessable_entity(format!("Field `{}` received an incompatible object", attr))
        })
}

fn from_value<T: DeserializeOwned>(value: Value, attr: &str) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::unprocessable_entity(format!("Field `{}`: {}", attr, e)))
}

fn shape_error(attr: &str, expected: &str, actual: &str) -> ApiError {
    ApiError::unprocessable_entity(format!(
        "Field `{}` expected {}, got {}",
        attr, expected, actual
    ))
}

impl Model for Value {
    fn attr(&self, name: &str) -> Attr<'_> {
        match self.get(name) {
            Some(value) => Attr::Value(value.clone()),
            None => Attr::Missing,
        }
    }

    fn set_attr(&mut self, name: &str, value: Assign) -> Result<(), ApiError> {
        match self {
            Value::Object(map) => {
                map.insert(name.to_string(), value.into_value());
                Ok(())
            }
            _ => Err(ApiError::unprocessable_entity(format!(
                "Cannot set `{}` on a non-object value",
                name
            ))),
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Model> {
        match self.get_mut(name) {
            Some(child) if child.is_object() => Some(child as &mut dyn Model),
            _ => None,
        }
    }

    fn snapshot(&self) -> Option<Value> {
        Some(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Model for Point {
        fn attr(&self, name: &str) -> Attr<'_> {
            match name {
                "x" => json!(self.x).into(),
                "y" => json!(self.y).into(),
                _ => Attr::Missing,
            }
        }
    }

    #[test]
    fn value_model_reads_keys() {
        let value = json!({"a": 1, "b": null});
        assert!(matches!(value.attr("a"), Attr::Value(v) if v == json!(1)));
        assert!(value.attr("b").is_absent());
        assert!(value.attr("c").is_absent());
    }

    #[test]
    fn value_model_writes_keys() {
        let mut value = json!({"a": 1});
        value.set_attr("b", Assign::Value(json!("two"))).unwrap();
        assert_eq!(value, json!({"a": 1, "b": "two"}));
    }

    #[test]
    fn value_model_rejects_write_to_scalar() {
        let mut value = json!(3);
        assert!(value.set_attr("b", Assign::Value(json!(1))).is_err());
    }

    #[test]
    fn child_mut_only_returns_objects() {
        let mut value = json!({"inner": {"x": 1}, "flat": 2});
        assert!(value.child_mut("inner").is_some());
        assert!(value.child_mut("flat").is_none());
        assert!(value.child_mut("absent").is_none());
    }

    #[test]
    fn default_set_attr_is_read_only() {
        let mut point = Point { x: 1, y: 2 };
        let err = point.set_attr("x", Assign::Value(json!(5))).unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn into_model_downcasts_constructed_models() {
        let assign = Assign::Model(Box::new(Point { x: 3, y: 4 }));
        assert_eq!(assign.into_model::<Point>("p").unwrap(), Point { x: 3, y: 4 });
    }

    #[test]
    fn into_model_deserializes_plain_values() {
        let assign = Assign::Value(json!({"x": 1, "y": 2}));
        assert_eq!(assign.into_model::<Point>("p").unwrap(), Point { x: 1, y: 2 });
    }

    #[test]
    fn into_model_rejects_wrong_type() {
        let assign = Assign::Model(Box::new(json!({"x": 1})));
        assert!(assign.into_model::<Point>("p").is_err());
    }

    #[test]
    fn into_optional_model_accepts_null() {
        let assign = Assign::Value(Value::Null);
        assert_eq!(assign.into_optional_model::<Point>("p").unwrap(), None);
    }

    #[test]
    fn into_models_collects_lists() {
        let assign = Assign::Models(vec![
            Box::new(Point { x: 1, y: 1 }),
            Box::new(Point { x: 2, y: 2 }),
        ]);
        let points = assign.into_models::<Point>("points").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], Point { x: 2, y: 2 });
    }
}
