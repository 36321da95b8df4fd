//! Outbound field descriptors.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::SchemaError;
use crate::model::Model;
use crate::registrar::Descriptor;
use crate::resource::ResourceRef;

/// A pure function computing a field's value from its backing object.
#[derive(Clone)]
pub struct Compute(Arc<dyn Fn(&dyn Model) -> Value + Send + Sync>);

impl Compute {
    pub fn new(f: impl Fn(&dyn Model) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, model: &dyn Model) -> Value {
        (self.0)(model)
    }
}

impl fmt::Debug for Compute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Compute(..)")
    }
}

/// Produces one named relative link for a backing object, or nothing.
#[derive(Clone)]
pub struct LinkGenerator(Arc<dyn Fn(&dyn Model) -> Option<(String, String)> + Send + Sync>);

impl LinkGenerator {
    pub fn new(f: impl Fn(&dyn Model) -> Option<(String, String)> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, model: &dyn Model) -> Option<(String, String)> {
        (self.0)(model)
    }
}

impl fmt::Debug for LinkGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LinkGenerator(..)")
    }
}

/// The value type of a [`Field`].
#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    /// Rendered as text, optionally rounded to `places` and prefixed (`"$12.50"`).
    Decimal {
        places: Option<u32>,
        prefix: String,
    },
    Timestamp,
    Url,
    Scope,
    List {
        item: Option<Box<FieldType>>,
    },
    /// One nested resource. `subfields` overrides the target's default fields.
    Resource {
        target: ResourceRef,
        subfields: Option<Vec<String>>,
    },
    ResourceList {
        target: ResourceRef,
        subfields: Option<Vec<String>>,
    },
    /// `{rel: url}` object built from generators; renders `null` when empty.
    RelativeLinks {
        generators: Vec<LinkGenerator>,
    },
    /// Verbatim value.
    Any,
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Decimal { .. } => "decimal",
            FieldType::Timestamp => "timestamp",
            FieldType::Url => "url",
            FieldType::Scope => "scope",
            FieldType::List { .. } => "list",
            FieldType::Resource { .. } => "resource",
            FieldType::ResourceList { .. } => "resource_list",
            FieldType::RelativeLinks { .. } => "relative_links",
            FieldType::Any => "any",
        }
    }

    /// The nested resource reference and subfield override, if any.
    pub fn resource_target(&self) -> Option<(&ResourceRef, Option<&[String]>)> {
        match self {
            FieldType::Resource { target, subfields }
            | FieldType::ResourceList { target, subfields } => {
                Some((target, subfields.as_deref()))
            }
            FieldType::List { item: Some(item) } => item.resource_target(),
            _ => None,
        }
    }
}

/// A named, typed outbound value of a resource.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    pub value_type: FieldType,
    pub description: String,
    pub details: Option<String>,
    pub property: Option<String>,
    pub compute: Option<Compute>,
}

impl Field {
    pub fn new(value_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            value_type,
            description: description.into(),
            details: None,
            property: None,
            compute: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(FieldType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(FieldType::Integer, description)
    }

    pub fn float(description: impl Into<String>) -> Self {
        Self::new(FieldType::Float, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(FieldType::Boolean, description)
    }

    pub fn decimal(description: impl Into<String>) -> Self {
        Self::new(
            FieldType::Decimal {
                places: None,
                prefix: String::new(),
            },
            description,
        )
    }

    pub fn timestamp(description: impl Into<String>) -> Self {
        Self::new(FieldType::Timestamp, description)
    }

    pub fn url(description: impl Into<String>) -> Self {
        Self::new(FieldType::Url, description)
    }

    pub fn scope(description: impl Into<String>) -> Self {
        Self::new(FieldType::Scope, description)
    }

    pub fn list(description: impl Into<String>) -> Self {
        Self::new(FieldType::List { item: None }, description)
    }

    pub fn any(description: impl Into<String>) -> Self {
        Self::new(FieldType::Any, description)
    }

    pub fn resource(description: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        Self::new(
            FieldType::Resource {
                target: target.into(),
                subfields: None,
            },
            description,
        )
    }

    pub fn resource_list(description: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        Self::new(
            FieldType::ResourceList {
                target: target.into(),
                subfields: None,
            },
            description,
        )
    }

    pub fn relative_links(description: impl Into<String>) -> Self {
        Self::new(
            FieldType::RelativeLinks {
                generators: Vec::new(),
            },
            description,
        )
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Read the value from a differently named attribute of the backing object.
    pub fn property(mut self, attribute: impl Into<String>) -> Self {
        self.property = Some(attribute.into());
        self
    }

    /// Compute the value from the whole backing object.
    ///
    /// Patches keep a computed field's value as given in dicts and skip it on models.
    pub fn compute(mut self, f: impl Fn(&dyn Model) -> Value + Send + Sync + 'static) -> Self {
        self.compute = Some(Compute::new(f));
        self
    }

    /// Round decimal output to `places` digits.
    pub fn places(mut self, n: u32) -> Self {
        if let FieldType::Decimal { places, .. } = &mut self.value_type {
            *places = Some(n);
        }
        self
    }

    /// Prefix decimal output, e.g. with a currency sign.
    pub fn prefix(mut self, text: impl Into<String>) -> Self {
        if let FieldType::Decimal { prefix, .. } = &mut self.value_type {
            *prefix = text.into();
        }
        self
    }

    /// Element type of a list field.
    pub fn item(mut self, item_type: FieldType) -> Self {
        if let FieldType::List { item } = &mut self.value_type {
            *item = Some(Box::new(item_type));
        }
        self
    }

    /// Override the fields rendered for a nested resource.
    pub fn subfields<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        match &mut self.value_type {
            FieldType::Resource { subfields, .. } | FieldType::ResourceList { subfields, .. } => {
                *subfields = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
            }
            _ => {}
        }
        self
    }

    /// Add a relative link generator.
    pub fn link(
        mut self,
        f: impl Fn(&dyn Model) -> Option<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        if let FieldType::RelativeLinks { generators } = &mut self.value_type {
            generators.push(LinkGenerator::new(f));
        }
        self
    }

    /// Attribute of the backing object this field reads and writes.
    pub fn source_attribute(&self) -> &str {
        self.property.as_deref().unwrap_or(&self.name)
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some() || matches!(self.value_type, FieldType::RelativeLinks { .. })
    }

    /// Documentation entry for this field.
    pub fn doc(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("name".into(), json!(self.name));
        doc.insert("type".into(), json!(self.value_type.type_name()));
        doc.insert("description".into(), json!(self.description));
        doc.insert("extended_description".into(), json!(self.details));
        match &self.value_type {
            FieldType::Resource { target, subfields } | FieldType::ResourceList { target, subfields } => {
                doc.insert("resource_type".into(), json!(target.target_name()));
                let defaults = match subfields {
                    Some(names) => json!(names),
                    None => target
                        .resolve()
                        .map(|r| json!(r.default_fields()))
                        .unwrap_or(Value::Null),
                };
                doc.insert("default_fields".into(), defaults);
            }
            FieldType::List { item } => {
                doc.insert(
                    "item_type".into(),
                    json!(item.as_ref().map_or("*", |i| i.type_name())),
                );
            }
            FieldType::Decimal { places, prefix } => {
                doc.insert("places".into(), json!(places));
                doc.insert("prefix".into(), json!(prefix));
            }
            _ => {}
        }
        Value::Object(doc)
    }
}

impl Descriptor for Field {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_name(&mut self, name: String) {
        self.name = name;
    }

    fn verify(&self, owner: &str) -> Result<(), SchemaError> {
        let invalid = |message: &str| SchemaError::InvalidDeclaration {
            owner: owner.to_string(),
            name: self.name.clone(),
            message: message.to_string(),
        };
        if self.property.is_some() && self.compute.is_some() {
            return Err(invalid("a field cannot have both a property and a compute function"));
        }
        if let Some(property) = &self.property {
            if property.is_empty() {
                return Err(invalid("property name must not be empty"));
            }
        }
        Ok(())
    }
}

/// Format a decimal value as text, optionally rounded half-to-even to `places`.
///
/// Returns `None` when `raw` is not a decimal number.
pub fn format_decimal(raw: &str, places: Option<u32>) -> Option<String> {
    let raw = raw.trim();
    let expanded;
    let raw = if raw.contains(|c| c == 'e' || c == 'E') {
        expanded = expand_exponent(raw)?;
        expanded.as_str()
    } else {
        raw
    };

    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !digits_ok(int_part) || !digits_ok(frac_part) {
        return None;
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };

    let Some(places) = places.map(|p| p as usize) else {
        let sign = if negative { "-" } else { "" };
        return Some(if frac_part.is_empty() {
            format!("{}{}", sign, int_part)
        } else {
            format!("{}{}.{}", sign, int_part, frac_part)
        });
    };

    let mut digits: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    let frac: Vec<u8> = frac_part.bytes().map(|b| b - b'0').collect();
    for i in 0..places {
        digits.push(frac.get(i).copied().unwrap_or(0));
    }

    if frac.len() > places {
        let next = frac[places];
        let rest_nonzero = frac[places + 1..].iter().any(|&d| d != 0);
        let last_odd = digits.last().map_or(false, |d| d % 2 == 1);
        if next > 5 || (next == 5 && (rest_nonzero || last_odd)) {
            let mut i = digits.len();
            loop {
                if i == 0 {
                    digits.insert(0, 1);
                    break;
                }
                i -= 1;
                if digits[i] == 9 {
                    digits[i] = 0;
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
    }

    let split = digits.len() - places;
    let text: String = digits.iter().map(|d| char::from(b'0' + d)).collect();
    let (int_text, frac_text) = text.split_at(split);
    let int_text = int_text.trim_start_matches('0');
    let int_text = if int_text.is_empty() { "0" } else { int_text };
    let sign = if negative { "-" } else { "" };
    Some(if places == 0 {
        format!("{}{}", sign, int_text)
    } else {
        format!("{}{}.{}", sign, int_text, frac_text)
    })
}

/// Rewrite `1.25e3` style input as plain digits, so rounding sees exact text.
fn expand_exponent(raw: &str) -> Option<String> {
    let (mantissa, exponent) = raw.split_once(|c| c == 'e' || c == 'E')?;
    let exponent: i64 = exponent.parse().ok()?;
    let (sign, unsigned) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
        || exponent.unsigned_abs() > 4096
    {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let point = int_part.len() as i64 + exponent;
    let body = if point <= 0 {
        format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
    } else if point as usize >= digits.len() {
        format!("{}{}", digits, "0".repeat(point as usize - digits.len()))
    } else {
        let (int_digits, frac_digits) = digits.split_at(point as usize);
        format!("{}.{}", int_digits, frac_digits)
    };
    let body = body.trim_start_matches('0');
    let body = if body.is_empty() || body.starts_with('.') {
        format!("0{}", body)
    } else {
        body.to_string()
    };
    Some(format!("{}{}", sign, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, mut field: Field) -> Field {
        field.bind_name(name.to_string());
        field
    }

    #[test]
    fn source_attribute_prefers_property() {
        let plain = named("name", Field::string("name"));
        assert_eq!(plain.source_attribute(), "name");

        let renamed = named("name", Field::string("name").property("key"));
        assert_eq!(renamed.source_attribute(), "key");
    }

    #[test]
    fn property_and_compute_conflict() {
        let field = named(
            "both",
            Field::string("both")
                .property("other")
                .compute(|_| Value::Null),
        );
        assert!(matches!(
            field.verify("thing"),
            Err(SchemaError::InvalidDeclaration { .. })
        ));
    }

    #[test]
    fn computed_fields() {
        assert!(Field::string("x").compute(|_| json!(1)).is_computed());
        assert!(Field::relative_links("rel").is_computed());
        assert!(!Field::string("x").is_computed());
    }

    #[test]
    fn doc_shape() {
        let field = named("amount", Field::decimal("Amount").places(2).prefix("$").details("money"));
        let doc = field.doc();
        assert_eq!(doc["name"], "amount");
        assert_eq!(doc["type"], "decimal");
        assert_eq!(doc["extended_description"], "money");
        assert_eq!(doc["prefix"], "$");
    }

    #[test]
    fn decimal_quantizes_half_even() {
        assert_eq!(format_decimal("12.5", Some(2)).as_deref(), Some("12.50"));
        assert_eq!(format_decimal("0.125", Some(2)).as_deref(), Some("0.12"));
        assert_eq!(format_decimal("0.135", Some(2)).as_deref(), Some("0.14"));
        assert_eq!(format_decimal("0.1251", Some(2)).as_deref(), Some("0.13"));
        assert_eq!(format_decimal("9.999", Some(2)).as_deref(), Some("10.00"));
        assert_eq!(format_decimal("-3", Some(1)).as_deref(), Some("-3.0"));
        assert_eq!(format_decimal("2.5", Some(0)).as_deref(), Some("2"));
    }

    #[test]
    fn decimal_exponents_round_like_plain_digits() {
        assert_eq!(format_decimal("1.25e0", Some(1)).as_deref(), Some("1.2"));
        assert_eq!(format_decimal("2.5e-1", Some(1)).as_deref(), Some("0.2"));
        assert_eq!(format_decimal("1.5e1", None).as_deref(), Some("15"));
        assert_eq!(format_decimal("-3.5E+2", Some(0)).as_deref(), Some("-350"));
        assert_eq!(format_decimal("1e21", Some(0)).as_deref(), Some("1000000000000000000000"));
        assert_eq!(format_decimal("1e", None), None);
        assert_eq!(format_decimal("1.2.3e1", None), None);
    }

    #[test]
    fn decimal_without_places_is_verbatim() {
        assert_eq!(format_decimal("12.345", None).as_deref(), Some("12.345"));
        assert_eq!(format_decimal("7", None).as_deref(), Some("7"));
    }

    #[test]
    fn decimal_rejects_garbage() {
        assert_eq!(format_decimal("abc", Some(2)), None);
        assert_eq!(format_decimal("", None), None);
        assert_eq!(format_decimal("1.2.3", None), None);
    }
}
