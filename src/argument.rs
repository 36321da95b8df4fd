//! Inbound argument descriptors and their validation/coercion rules.
//!
//! Every argument goes through the same steps:
//! absent -> default substitution -> required check -> type coercion ->
//! range/length check -> nested validation.
//!
//! Validation either returns a fully coerced value or an [`ArgumentError`]
//! naming the offending argument; partially coerced values never escape.

use serde_json::{json, Map, Number, Value};

use crate::error::{ArgumentError, SchemaError};
use crate::registrar::Descriptor;
use crate::types::json_type_name;

const REQUIRED: &str = "This argument is required.";
const REQUIRED_STRING: &str = "This argument is required, and cannot be an empty string.";
const INVALID_URL: &str = "The input you've provided is not a valid URL.";
const URL_HOST_CHARS: &str = ":-_.";

/// Type-specific coercion rules for an [`Argument`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentKind {
    Boolean,
    Integer {
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    Float {
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    /// Absolute http(s) URL, or a bare path when `path_only` is set.
    Url { path_only: bool },
    /// A list, each element optionally validated by `item`.
    List { item: Option<Box<Argument>> },
    /// A list of strings, also accepted as one separator-joined string.
    StringList {
        separator: String,
        trim_whitespace: bool,
    },
    /// OAuth-style space separated scope list.
    Scope,
    /// A JSON object, given as a mapping or a JSON-encoded string.
    JsonDict {
        fields: Vec<Argument>,
        allow_extra_fields: bool,
    },
}

/// A named, typed inbound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    name: String,
    pub description: String,
    pub details: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
    pub kind: ArgumentKind,
    misuse: Option<String>,
}

impl Argument {
    fn with_kind(description: impl Into<String>, kind: ArgumentKind) -> Self {
        Self {
            name: String::new(),
            description: description.into(),
            details: None,
            default: None,
            required: false,
            kind,
            misuse: None,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::with_kind(description, ArgumentKind::Boolean)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::with_kind(
            description,
            ArgumentKind::Integer {
                min_value: None,
                max_value: None,
            },
        )
    }

    pub fn float(description: impl Into<String>) -> Self {
        Self::with_kind(
            description,
            ArgumentKind::Float {
                min_value: None,
                max_value: None,
            },
        )
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::with_kind(
            description,
            ArgumentKind::String {
                min_length: None,
                max_length: None,
            },
        )
    }

    pub fn url(description: impl Into<String>) -> Self {
        Self::with_kind(description, ArgumentKind::Url { path_only: false })
    }

    pub fn list(description: impl Into<String>) -> Self {
        Self::with_kind(description, ArgumentKind::List { item: None })
    }

    /// String list split on `" "` unless [`Argument::separator`] says otherwise.
    pub fn string_list(description: impl Into<String>) -> Self {
        Self::with_kind(
            description,
            ArgumentKind::StringList {
                separator: " ".to_string(),
                trim_whitespace: false,
            },
        )
    }

    pub fn scope(description: impl Into<String>) -> Self {
        Self::with_kind(description, ArgumentKind::Scope)
    }

    pub fn json_dict(description: impl Into<String>) -> Self {
        Self::with_kind(
            description,
            ArgumentKind::JsonDict {
                fields: Vec::new(),
                allow_extra_fields: false,
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn min_value(mut self, min: f64) -> Self {
        match &mut self.kind {
            ArgumentKind::Integer { min_value, .. } | ArgumentKind::Float { min_value, .. } => {
                *min_value = Some(min)
            }
            _ => self.misuse("min_value"),
        }
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        match &mut self.kind {
            ArgumentKind::Integer { max_value, .. } | ArgumentKind::Float { max_value, .. } => {
                *max_value = Some(max)
            }
            _ => self.misuse("max_value"),
        }
        self
    }

    /// Closed range `[min, max]`.
    pub fn range(self, min: f64, max: f64) -> Self {
        self.min_value(min).max_value(max)
    }

    pub fn min_length(mut self, min: usize) -> Self {
        match &mut self.kind {
            ArgumentKind::String { min_length, .. } => *min_length = Some(min),
            _ => self.misuse("min_length"),
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        match &mut self.kind {
            ArgumentKind::String { max_length, .. } => *max_length = Some(max),
            _ => self.misuse("max_length"),
        }
        self
    }

    pub fn path_only(mut self) -> Self {
        match &mut self.kind {
            ArgumentKind::Url { path_only } => *path_only = true,
            _ => self.misuse("path_only"),
        }
        self
    }

    /// Validate every list element against `item`.
    pub fn item(mut self, item: Argument) -> Self {
        match &mut self.kind {
            ArgumentKind::List { item: slot } => *slot = Some(Box::new(item)),
            _ => self.misuse("item"),
        }
        self
    }

    pub fn separator(mut self, value: impl Into<String>) -> Self {
        match &mut self.kind {
            ArgumentKind::StringList { separator, .. } => *separator = value.into(),
            _ => self.misuse("separator"),
        }
        self
    }

    pub fn trim_whitespace(mut self) -> Self {
        match &mut self.kind {
            ArgumentKind::StringList {
                trim_whitespace, ..
            } => *trim_whitespace = true,
            _ => self.misuse("trim_whitespace"),
        }
        self
    }

    /// Declare a key of a JSON dict argument.
    pub fn field(mut self, key: impl Into<String>, mut argument: Argument) -> Self {
        match &mut self.kind {
            ArgumentKind::JsonDict { fields, .. } => {
                argument.name = key.into();
                fields.push(argument);
            }
            _ => self.misuse("field"),
        }
        self
    }

    pub fn allow_extra_fields(mut self) -> Self {
        match &mut self.kind {
            ArgumentKind::JsonDict {
                allow_extra_fields, ..
            } => *allow_extra_fields = true,
            _ => self.misuse("allow_extra_fields"),
        }
        self
    }

    fn misuse(&mut self, option: &str) {
        if self.misuse.is_none() {
            self.misuse = Some(format!(
                "`{}` does not apply to {} arguments",
                option,
                self.type_name()
            ));
        }
    }

    /// Short type tag used in documentation.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ArgumentKind::Boolean => "boolean",
            ArgumentKind::Integer { .. } => "integer",
            ArgumentKind::Float { .. } => "float",
            ArgumentKind::String { .. } => "string",
            ArgumentKind::Url { .. } => "url",
            ArgumentKind::List { .. } => "list",
            ArgumentKind::StringList { .. } => "string_list",
            ArgumentKind::Scope => "scope",
            ArgumentKind::JsonDict { .. } => "json_dict",
        }
    }

    /// Whether transport list wrapping should be kept rather than unwrapped.
    pub fn accepts_list(&self) -> bool {
        matches!(
            self.kind,
            ArgumentKind::List { .. } | ArgumentKind::StringList { .. } | ArgumentKind::Scope
        )
    }

    /// Validate `raw` under this argument's registered name.
    pub fn validate(&self, raw: Option<&Value>) -> Result<Option<Value>, ArgumentError> {
        self.validate_at(raw, &self.name)
    }

    /// Validate `raw`, reporting failures under `path`.
    ///
    /// `Ok(None)` means the argument was absent, had no default and is not
    /// required.
    pub fn validate_at(&self, raw: Option<&Value>, path: &str) -> Result<Option<Value>, ArgumentError> {
        let value = match raw {
            None | Some(Value::Null) => self.default.clone(),
            Some(value) => Some(value.clone()),
        };

        let Some(value) = value else {
            if self.required {
                return Err(ArgumentError::new(path, self.required_message()));
            }
            return Ok(None);
        };

        self.coerce(value, path).map(Some)
    }

    fn required_message(&self) -> &'static str {
        match self.kind {
            ArgumentKind::String { .. } | ArgumentKind::Url { .. } => REQUIRED_STRING,
            _ => REQUIRED,
        }
    }

    fn coerce(&self, value: Value, path: &str) -> Result<Value, ArgumentError> {
        match &self.kind {
            ArgumentKind::Boolean => coerce_bool(value, path),
            ArgumentKind::Integer {
                min_value,
                max_value,
            } => {
                let n = coerce_integer(&value, path)?;
                check_range(n as f64, *min_value, *max_value, path)?;
                Ok(json!(n))
            }
            ArgumentKind::Float {
                min_value,
                max_value,
            } => {
                let n = coerce_float(&value, path)?;
                check_range(n, *min_value, *max_value, path)?;
                Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| ArgumentError::new(path, format!("{} is not a valid number", n)))
            }
            ArgumentKind::String {
                min_length,
                max_length,
            } => {
                let s = self.coerce_string(value, path)?;
                check_length(&s, *min_length, *max_length, path)?;
                Ok(Value::String(s))
            }
            ArgumentKind::Url { path_only } => {
                let s = self.coerce_string(value, path)?;
                check_url(&s, *path_only, path)?;
                Ok(Value::String(s))
            }
            ArgumentKind::List { item } => {
                let items = match value {
                    Value::Array(items) => items,
                    other => return Err(expected(path, "a list", &other)),
                };
                let validated = items
                    .iter()
                    .enumerate()
                    .map(|(i, element)| match item {
                        Some(item) => item
                            .validate_at(Some(element), &format!("{}[{}]", path, i))
                            .map(|v| v.unwrap_or(Value::Null)),
                        None => Ok(element.clone()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(validated))
            }
            ArgumentKind::StringList {
                separator,
                trim_whitespace,
            } => split_string_list(value, separator, *trim_whitespace, path),
            ArgumentKind::Scope => split_string_list(value, " ", false, path),
            ArgumentKind::JsonDict {
                fields,
                allow_extra_fields,
            } => coerce_dict(value, fields, *allow_extra_fields, path),
        }
    }

    fn coerce_string(&self, value: Value, path: &str) -> Result<String, ArgumentError> {
        let s = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(expected(path, "a string", &other)),
        };
        if self.required && s.is_empty() {
            return Err(ArgumentError::new(path, REQUIRED_STRING));
        }
        Ok(s)
    }

    /// Documentation entry for this argument.
    pub fn doc(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("type".into(), json!(self.type_name()));
        doc.insert("description".into(), json!(self.description));
        doc.insert("default".into(), self.default.clone().unwrap_or(Value::Null));
        doc.insert("required".into(), json!(self.required));
        if let Some(details) = &self.details {
            doc.insert("detailed_description".into(), json!(details));
        }
        match &self.kind {
            ArgumentKind::Integer {
                min_value,
                max_value,
            }
            | ArgumentKind::Float {
                min_value,
                max_value,
            } => {
                doc.insert("min_value".into(), json!(min_value));
                doc.insert("max_value".into(), json!(max_value));
            }
            ArgumentKind::String {
                min_length,
                max_length,
            } => {
                doc.insert("min_length".into(), json!(min_length));
                doc.insert("max_length".into(), json!(max_length));
            }
            ArgumentKind::Url { path_only } => {
                doc.insert("path_only".into(), json!(path_only));
            }
            ArgumentKind::List { item } => {
                doc.insert(
                    "item_type".into(),
                    item.as_ref().map_or(json!("*"), |i| i.doc()),
                );
            }
            ArgumentKind::StringList { separator, .. } => {
                doc.insert("separator".into(), json!(separator));
            }
            ArgumentKind::Scope => {
                doc.insert("separator".into(), json!(" "));
            }
            ArgumentKind::JsonDict {
                fields,
                allow_extra_fields,
            } => {
                let field_docs: Map<String, Value> =
                    fields.iter().map(|f| (f.name.clone(), f.doc())).collect();
                doc.insert("fields".into(), Value::Object(field_docs));
                doc.insert("allow_extra_fields".into(), json!(allow_extra_fields));
            }
            ArgumentKind::Boolean => {}
        }
        Value::Object(doc)
    }
}

impl Descriptor for Argument {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_name(&mut self, name: String) {
        self.name = name;
    }

    fn verify(&self, owner: &str) -> Result<(), SchemaError> {
        let invalid = |message: String| SchemaError::InvalidDeclaration {
            owner: owner.to_string(),
            name: self.name.clone(),
            message,
        };

        if let Some(message) = &self.misuse {
            return Err(invalid(message.clone()));
        }

        match &self.kind {
            ArgumentKind::Integer {
                min_value: Some(min),
                max_value: Some(max),
            }
            | ArgumentKind::Float {
                min_value: Some(min),
                max_value: Some(max),
            } if min > max => {
                return Err(invalid(format!("min_value {} exceeds max_value {}", min, max)));
            }
            ArgumentKind::String {
                min_length: Some(min),
                max_length: Some(max),
            } if min > max => {
                return Err(invalid(format!("min_length {} exceeds max_length {}", min, max)));
            }
            ArgumentKind::StringList { separator, .. } if separator.is_empty() => {
                return Err(invalid("separator must not be empty".into()));
            }
            ArgumentKind::List { item: Some(item) } => {
                item.verify(&format!("{}.{}", owner, self.name))?;
            }
            ArgumentKind::JsonDict { fields, .. } => {
                let owner = format!("{}.{}", owner, self.name);
                for (i, field) in fields.iter().enumerate() {
                    if field.name.is_empty() {
                        return Err(SchemaError::EmptyName { owner });
                    }
                    if fields[..i].iter().any(|f| f.name == field.name) {
                        return Err(SchemaError::DuplicateName {
                            owner,
                            name: field.name.clone(),
                        });
                    }
                    field.verify(&owner)?;
                }
            }
            _ => {}
        }

        // Defaults go through the same coercion as input.
        if let Some(default) = &self.default {
            self.coerce(default.clone(), &self.name)
                .map_err(|e| invalid(format!("invalid default: {}", e.message)))?;
        }
        Ok(())
    }
}

fn expected(path: &str, what: &str, actual: &Value) -> ArgumentError {
    ArgumentError::new(
        path,
        format!("Expected {}, but got `{}`", what, json_type_name(actual)),
    )
}

fn coerce_bool(value: Value, path: &str) -> Result<Value, ArgumentError> {
    let parsed = match &value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.map(Value::Bool).ok_or_else(|| {
        let shown = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ArgumentError::new(
            path,
            format!(
                "Invalid value '{}'. Boolean arguments must be either 'true' or 'false'.",
                shown
            ),
        )
    })
}

fn coerce_integer(value: &Value, path: &str) -> Result<i64, ArgumentError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ArgumentError::new(path, format!("{} is not a valid integer", display(value))))
}

fn coerce_float(value: &Value, path: &str) -> Result<f64, ArgumentError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| ArgumentError::new(path, format!("{} is not a valid number", display(value))))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_range(n: f64, min: Option<f64>, max: Option<f64>, path: &str) -> Result<(), ArgumentError> {
    match (min, max) {
        (Some(min), Some(max)) if !(min <= n && n <= max) => Err(ArgumentError::new(
            path,
            format!("You must provide a value between {} and {}", min, max),
        )),
        (Some(min), None) if n < min => Err(ArgumentError::new(
            path,
            format!("You must provide a value greater than or equal to {}", min),
        )),
        (None, Some(max)) if n > max => Err(ArgumentError::new(
            path,
            format!("You must provide a value less than or equal to {}", max),
        )),
        _ => Ok(()),
    }
}

fn check_length(
    s: &str,
    min: Option<usize>,
    max: Option<usize>,
    path: &str,
) -> Result<(), ArgumentError> {
    let len = s.chars().count();
    if let Some(min) = min {
        if len < min {
            return Err(ArgumentError::new(
                path,
                format!("You must provide a value of at least {} characters", min),
            ));
        }
    }
    if let Some(max) = max {
        if len > max {
            return Err(ArgumentError::new(
                path,
                format!("You must provide a value of at most {} characters", max),
            ));
        }
    }
    Ok(())
}

fn check_url(s: &str, path_only: bool, path: &str) -> Result<(), ArgumentError> {
    let invalid = || ArgumentError::new(path, INVALID_URL);
    if path_only {
        // A bare path has neither scheme nor authority.
        return match url::Url::parse(s) {
            Err(url::ParseError::RelativeUrlWithoutBase) if !s.is_empty() && !s.starts_with("//") => {
                Ok(())
            }
            _ => Err(invalid()),
        };
    }

    let parsed = url::Url::parse(s).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid());
    }
    let host = parsed.host_str().ok_or_else(invalid)?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || URL_HOST_CHARS.contains(c))
    {
        return Err(invalid());
    }
    Ok(())
}

fn split_string_list(
    value: Value,
    separator: &str,
    trim: bool,
    path: &str,
) -> Result<Value, ArgumentError> {
    let pieces: Vec<String> = match value {
        Value::String(s) => s.split(separator).map(str::to_string).collect(),
        // A lone element is a separated string delivered as a one-item query list.
        Value::Array(mut items) if items.len() == 1 && items[0].is_string() => {
            match items.pop() {
                Some(Value::String(s)) => s.split(separator).map(str::to_string).collect(),
                _ => Vec::new(),
            }
        }
        Value::Array(items) => {
            let mut pieces = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => pieces.push(s),
                    Value::Number(n) => pieces.push(n.to_string()),
                    Value::Bool(b) => pieces.push(b.to_string()),
                    other => return Err(expected(path, "a list of strings", &other)),
                }
            }
            pieces
        }
        other => return Err(expected(path, "a string or list", &other)),
    };

    Ok(Value::Array(
        pieces
            .into_iter()
            .map(|p| Value::String(if trim { p.trim().to_string() } else { p }))
            .collect(),
    ))
}

fn coerce_dict(
    value: Value,
    fields: &[Argument],
    allow_extra_fields: bool,
    path: &str,
) -> Result<Value, ArgumentError> {
    let value = match value {
        Value::String(s) => serde_json::from_str(&s).map_err(|_| {
            tracing::debug!(argument = path, "could not decode JSON dict argument");
            ArgumentError::new(path, format!("Invalid JSON string: '{}'", s))
        })?,
        other => other,
    };
    let mut input = match value {
        Value::Object(input) => input,
        other => return Err(expected(path, "a dict", &other)),
    };

    let extra: Vec<String> = input
        .keys()
        .filter(|k| !fields.iter().any(|f| &f.name == *k))
        .cloned()
        .collect();
    if !extra.is_empty() && !allow_extra_fields {
        let listed: Vec<String> = extra.iter().map(|k| format!("`{}`", k)).collect();
        return Err(ArgumentError::new(
            path,
            format!("Extra keys {} are not allowed", listed.join(", ")),
        ));
    }

    let mut output = Map::new();
    for field in fields {
        let nested = format!("{}.{}", path, field.name);
        let validated = field.validate_at(input.get(&field.name), &nested)?;
        output.insert(field.name.clone(), validated.unwrap_or(Value::Null));
    }
    for key in extra {
        if let Some(v) = input.remove(&key) {
            tracing::debug!(argument = path, key = %key, "passing through unvalidated key");
            output.insert(key, v);
        }
    }
    Ok(Value::Object(output))
}
