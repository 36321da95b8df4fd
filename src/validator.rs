//! Checking rendered payloads against a resource's output schema.

use serde_json::Value;

use crate::doc::resource_json_schema;
use crate::error::{CheckError, Violation};
use crate::resource::Resource;

/// Check a payload against the JSON Schema of `resource`.
///
/// Builds the schema with [`resource_json_schema`], then validates the
/// payload against it, collecting every violation.
///
/// # Errors
///
/// Returns `CheckError::Schema` if the schema cannot be built, or
/// `CheckError::Invalid` if the payload doesn't match it.
pub fn validate_rendered(resource: &Resource, payload: &Value) -> Result<(), CheckError> {
    let schema = resource_json_schema(resource).map_err(|e| CheckError::Schema {
        message: e.to_string(),
    })?;
    validate_against_schema(&schema, payload)
}

/// Validate a payload against an already-built schema.
///
/// Use this when checking many payloads against the same resource.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), CheckError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| CheckError::Schema {
        message: e.to_string(),
    })?;

    let errors: Vec<Violation> = validator
        .iter_errors(payload)
        .map(|e| Violation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CheckError::Invalid { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use serde_json::json;

    fn money() -> std::sync::Arc<Resource> {
        let price = Resource::builder("Price", "a price")
            .field("amount", Field::decimal("amount").places(2).prefix("$"))
            .field("currency", Field::string("currency"))
            .build()
            .unwrap();
        Resource::builder("Item", "an item")
            .field("name", Field::string("name"))
            .field("count", Field::integer("count"))
            .field("price", Field::resource("price", price))
            .field("tags", Field::list("tags"))
            .build()
            .unwrap()
    }

    #[test]
    fn valid_payload() {
        let payload = json!({
            "name": "widget",
            "count": 3,
            "price": {"amount": "$1.50", "currency": "USD"},
            "tags": ["a"],
        });
        assert!(validate_rendered(&money(), &payload).is_ok());
    }

    #[test]
    fn partial_payload_is_valid() {
        assert!(validate_rendered(&money(), &json!({"name": "widget"})).is_ok());
        assert!(validate_rendered(&money(), &json!({"price": null})).is_ok());
    }

    #[test]
    fn wrong_type() {
        let result = validate_rendered(&money(), &json!({"count": "three"}));
        match result {
            Err(CheckError::Invalid { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "/count");
            }
            other => panic!("expected one violation, got {:?}", other),
        }
    }

    #[test]
    fn undeclared_key_rejected() {
        let result = validate_rendered(&money(), &json!({"name": "w", "colour": "red"}));
        assert!(matches!(result, Err(CheckError::Invalid { .. })));
    }

    #[test]
    fn collects_multiple_errors() {
        let payload = json!({"count": 1.5, "price": {"amount": 1}});
        match validate_rendered(&money(), &payload) {
            Err(CheckError::Invalid { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected two violations, got {:?}", other),
        }
    }
}
