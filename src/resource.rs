//! Resource schemas, forward references and the resource registry.
//!
//! Resources are built once with [`Resource::builder`] and shared behind
//! `Arc`. A field may point at another resource directly or by name; named
//! references are resolved in one linking pass ([`ResourceRegistry::link`])
//! before any request is served, which allows two resources to nest each
//! other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{RenderError, SchemaError};
use crate::field::{Field, FieldType};
use crate::model::Model;
use crate::registrar::{Descriptor, SchemaTable};

/// Name of the shared no-content resource.
pub const NO_CONTENT: &str = "NoContent";

/// Hook run after a resource's fields are rendered.
pub type PostRender = Arc<dyn Fn(&dyn Model, &Context, &mut Map<String, Value>) + Send + Sync>;

/// How a resource turns its backing object into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Walk the field table.
    Fields,
    /// Emit the backing object verbatim. Never use on production endpoints.
    Debug,
    /// Render nothing; endpoints returning it produce an empty body.
    NoContent,
}

/// Constructor used by the patch engine to build fresh nested models.
#[derive(Clone, Copy)]
pub struct UnderlyingModel {
    pub type_name: &'static str,
    pub construct: fn(Value) -> Result<Box<dyn Model>, serde_json::Error>,
}

impl fmt::Debug for UnderlyingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnderlyingModel")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn construct<T: Model + DeserializeOwned>(value: Value) -> Result<Box<dyn Model>, serde_json::Error> {
    let model: T = serde_json::from_value(value)?;
    Ok(Box::new(model))
}

/// A named, field-tabled response schema.
pub struct Resource {
    name: String,
    pub description: String,
    kind: ResourceKind,
    fields: SchemaTable<Field>,
    default_fields: Vec<String>,
    underlying_model: Option<UnderlyingModel>,
    post_render: Option<PostRender>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields.names().collect::<Vec<_>>())
            .field("default_fields", &self.default_fields)
            .field("underlying_model", &self.underlying_model)
            .finish()
    }
}

impl Resource {
    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
            default_fields: None,
            underlying_model: None,
            post_render: None,
        }
    }

    /// A pass-through resource that renders the backing object's snapshot.
    pub fn debug(name: impl Into<String>, description: impl Into<String>) -> Arc<Resource> {
        Arc::new(Resource {
            name: name.into(),
            description: description.into(),
            kind: ResourceKind::Debug,
            fields: SchemaTable::default(),
            default_fields: Vec::new(),
            underlying_model: None,
            post_render: None,
        })
    }

    /// The shared no-content resource.
    pub fn no_content() -> Arc<Resource> {
        static SHARED: OnceLock<Arc<Resource>> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                Arc::new(Resource {
                    name: NO_CONTENT.to_string(),
                    description: "No content".to_string(),
                    kind: ResourceKind::NoContent,
                    fields: SchemaTable::default(),
                    default_fields: Vec::new(),
                    underlying_model: None,
                    post_render: None,
                })
            })
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_debug(&self) -> bool {
        self.kind == ResourceKind::Debug
    }

    pub fn is_no_content(&self) -> bool {
        self.kind == ResourceKind::NoContent
    }

    pub fn fields(&self) -> &SchemaTable<Field> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields rendered when the caller does not override them.
    pub fn default_fields(&self) -> &[String] {
        &self.default_fields
    }

    pub fn underlying_model(&self) -> Option<&UnderlyingModel> {
        self.underlying_model.as_ref()
    }

    pub fn post_render(&self) -> Option<&PostRender> {
        self.post_render.as_ref()
    }

    /// Check that every name in `names` is a declared field.
    pub fn check_field_names(&self, owner: &str, names: &[String]) -> Result<(), SchemaError> {
        if self.kind != ResourceKind::Fields {
            return Ok(());
        }
        for name in names {
            if !self.fields.contains(name) {
                return Err(SchemaError::UnknownField {
                    owner: owner.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`Resource`].
pub struct ResourceBuilder {
    name: String,
    description: String,
    fields: Vec<(String, Field)>,
    default_fields: Option<Vec<String>>,
    underlying_model: Option<UnderlyingModel>,
    post_render: Option<PostRender>,
}

impl ResourceBuilder {
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Fields rendered by default. When never called, every field is rendered.
    pub fn default_fields<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.default_fields = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Type built by the patch engine when a nested patch targets a new value.
    pub fn underlying_model<T: Model + DeserializeOwned>(mut self) -> Self {
        self.underlying_model = Some(UnderlyingModel {
            type_name: std::any::type_name::<T>(),
            construct: construct::<T>,
        });
        self
    }

    pub fn post_render(
        mut self,
        hook: impl Fn(&dyn Model, &Context, &mut Map<String, Value>) + Send + Sync + 'static,
    ) -> Self {
        self.post_render = Some(Arc::new(hook));
        self
    }

    /// Register the field table and freeze the resource.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for reserved or duplicate field names, invalid
    /// field declarations, or default fields that are not declared.
    pub fn build(self) -> Result<Arc<Resource>, SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName {
                owner: "resource".to_string(),
            });
        }
        let fields = SchemaTable::register(&self.name, self.fields)?;
        let default_fields = match self.default_fields {
            Some(names) => names,
            None => fields.names().map(str::to_string).collect(),
        };

        let resource = Resource {
            name: self.name,
            description: self.description,
            kind: ResourceKind::Fields,
            fields,
            default_fields,
            underlying_model: self.underlying_model,
            post_render: self.post_render,
        };
        resource.check_field_names(&resource.name, &resource.default_fields)?;
        tracing::debug!(
            resource = %resource.name,
            fields = resource.fields.len(),
            "registered resource"
        );
        Ok(Arc::new(resource))
    }
}

/// A reference from a field or endpoint to a resource.
#[derive(Clone)]
pub enum ResourceRef {
    Direct(Arc<Resource>),
    /// Resolved by name during linking.
    Named {
        name: String,
        resolved: OnceLock<Weak<Resource>>,
    },
}

impl ResourceRef {
    pub fn named(name: impl Into<String>) -> Self {
        ResourceRef::Named {
            name: name.into(),
            resolved: OnceLock::new(),
        }
    }

    pub fn target_name(&self) -> &str {
        match self {
            ResourceRef::Direct(resource) => resource.name(),
            ResourceRef::Named { name, .. } => name,
        }
    }

    /// The referenced resource.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Unlinked` for a named reference that was never
    /// linked, or whose registry has been dropped.
    pub fn resolve(&self) -> Result<Arc<Resource>, RenderError> {
        match self {
            ResourceRef::Direct(resource) => Ok(resource.clone()),
            ResourceRef::Named { name, resolved } => resolved
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| RenderError::Unlinked { name: name.clone() }),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.resolve().is_ok()
    }

    /// Bind a named reference. Linking is write-once; later calls are ignored.
    fn link(&self, target: &Arc<Resource>) {
        if let ResourceRef::Named { name, resolved } = self {
            if resolved.set(Arc::downgrade(target)).is_err() {
                let same = resolved
                    .get()
                    .and_then(Weak::upgrade)
                    .map_or(false, |current| Arc::ptr_eq(&current, target));
                if !same {
                    tracing::warn!(
                        resource = %name,
                        "reference already linked by another API; keeping the first target"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Direct(resource) => write!(f, "Direct({})", resource.name()),
            ResourceRef::Named { name, .. } => write!(f, "Named({})", name),
        }
    }
}

impl From<Arc<Resource>> for ResourceRef {
    fn from(resource: Arc<Resource>) -> Self {
        ResourceRef::Direct(resource)
    }
}

impl From<&Arc<Resource>> for ResourceRef {
    fn from(resource: &Arc<Resource>) -> Self {
        ResourceRef::Direct(resource.clone())
    }
}

impl From<&str> for ResourceRef {
    fn from(name: &str) -> Self {
        ResourceRef::named(name)
    }
}

/// Resources known to one API, keyed by name.
///
/// Holds the strong references that named links point at.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Vec<Arc<Resource>>,
    index: HashMap<String, usize>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resource` and every resource it references directly.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::DuplicateResource` when a different resource is
    /// already registered under the same name.
    pub fn register(&mut self, resource: &Arc<Resource>) -> Result<(), SchemaError> {
        if let Some(&i) = self.index.get(resource.name()) {
            if Arc::ptr_eq(&self.resources[i], resource) {
                return Ok(());
            }
            return Err(SchemaError::DuplicateResource {
                name: resource.name().to_string(),
            });
        }
        self.index
            .insert(resource.name().to_string(), self.resources.len());
        self.resources.push(resource.clone());

        for field in resource.fields() {
            if let Some((ResourceRef::Direct(nested), _)) = field.value_type.resource_target() {
                self.register(nested)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    /// Registered resources in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Resource>> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolve `reference` against this registry.
    pub fn link_ref(&self, owner: &str, reference: &ResourceRef) -> Result<Arc<Resource>, SchemaError> {
        if let ResourceRef::Named { name, .. } = reference {
            let target = self.get(name).ok_or_else(|| SchemaError::UnresolvedResource {
                owner: owner.to_string(),
                name: name.clone(),
            })?;
            reference.link(target);
        }
        reference
            .resolve()
            .map_err(|_| SchemaError::UnresolvedResource {
                owner: owner.to_string(),
                name: reference.target_name().to_string(),
            })
    }

    /// Resolve every named reference held by registered resources and check
    /// subfield overrides against their targets.
    ///
    /// # Errors
    ///
    /// Fails on the first unregistered name or undeclared subfield.
    pub fn link(&self) -> Result<(), SchemaError> {
        for resource in &self.resources {
            for field in resource.fields() {
                let Some((reference, subfields)) = field.value_type.resource_target() else {
                    continue;
                };
                let owner = format!("{}.{}", resource.name(), field.name());
                let target = self.link_ref(&owner, reference)?;
                if let Some(names) = subfields {
                    target.check_field_names(&owner, names)?;
                }
            }
        }
        tracing::debug!(resources = self.resources.len(), "linked resources");
        Ok(())
    }
}

/// What an endpoint returns: a resource, an optional field override, and
/// whether the payload is a list.
#[derive(Debug, Clone)]
pub struct Returns {
    pub description: String,
    pub target: ResourceRef,
    pub fields: Option<Vec<String>>,
    pub many: bool,
}

impl Returns {
    pub fn one(description: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        Self {
            description: description.into(),
            target: target.into(),
            fields: None,
            many: false,
        }
    }

    /// A homogeneous list of `target`.
    pub fn many(description: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        Self {
            many: true,
            ..Self::one(description, target)
        }
    }

    pub fn no_content() -> Self {
        Self::one("No content", Resource::no_content())
    }

    /// Override the rendered field set.
    pub fn fields<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.fields = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn doc(&self) -> Value {
        let resource_type = match self.target.resolve() {
            Ok(resource) if resource.is_no_content() => "no_content",
            Ok(resource) if resource.is_debug() => "debug",
            _ if self.many => "resource_list",
            _ => "resource",
        };
        serde_json::json!({
            "description": self.description,
            "resource_name": self.target.target_name(),
            "resource_type": resource_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Arc<Resource> {
        Resource::builder("Leaf", "a leaf")
            .field("id", Field::integer("id"))
            .field("label", Field::string("label"))
            .default_fields(&["id"])
            .build()
            .unwrap()
    }

    #[test]
    fn default_fields_fall_back_to_all() {
        let resource = Resource::builder("Thing", "thing")
            .field("a", Field::string("a"))
            .field("b", Field::string("b"))
            .build()
            .unwrap();
        assert_eq!(resource.default_fields(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_default_field_is_rejected() {
        let err = Resource::builder("Thing", "thing")
            .field("a", Field::string("a"))
            .default_fields(&["missing"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { name, .. } if name == "missing"));
    }

    #[test]
    fn reserved_field_name_is_rejected() {
        let err = Resource::builder("Thing", "thing")
            .field("_internal", Field::string("nope"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn no_content_is_shared() {
        assert!(Arc::ptr_eq(&Resource::no_content(), &Resource::no_content()));
        assert!(Resource::no_content().is_no_content());
    }

    #[test]
    fn registry_registers_direct_children() {
        let leaf = leaf();
        let parent = Resource::builder("Parent", "parent")
            .field("child", Field::resource("child", &leaf))
            .build()
            .unwrap();

        let mut registry = ResourceRegistry::new();
        registry.register(&parent).unwrap();
        assert!(registry.get("Leaf").is_some());
        assert_eq!(registry.len(), 2);

        // same instance twice is fine
        registry.register(&leaf).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_rejects_conflicting_names() {
        let mut registry = ResourceRegistry::new();
        registry.register(&leaf()).unwrap();
        let err = registry.register(&leaf()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateResource { .. }));
    }

    #[test]
    fn named_reference_links_lazily() {
        let node = Resource::builder("Node", "self-referential")
            .field("id", Field::integer("id"))
            .field("next", Field::resource("next", "Node"))
            .build()
            .unwrap();

        let reference = node.field("next").unwrap().value_type.resource_target().unwrap().0;
        assert!(!reference.is_linked());
        assert!(matches!(reference.resolve(), Err(RenderError::Unlinked { .. })));

        let mut registry = ResourceRegistry::new();
        registry.register(&node).unwrap();
        registry.link().unwrap();
        assert!(Arc::ptr_eq(&reference.resolve().unwrap(), &node));
    }

    #[test]
    fn link_fails_on_unknown_name() {
        let orphan = Resource::builder("Orphan", "orphan")
            .field("ghost", Field::resource("ghost", "Ghost"))
            .build()
            .unwrap();
        let mut registry = ResourceRegistry::new();
        registry.register(&orphan).unwrap();
        let err = registry.link().unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedResource { name, .. } if name == "Ghost"));
    }

    #[test]
    fn link_checks_subfields() {
        let leaf = leaf();
        let parent = Resource::builder("Parent", "parent")
            .field("child", Field::resource("child", "Leaf").subfields(&["nope"]))
            .build()
            .unwrap();
        let mut registry = ResourceRegistry::new();
        registry.register(&leaf).unwrap();
        registry.register(&parent).unwrap();
        assert!(matches!(
            registry.link(),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn named_links_keep_the_first_target() {
        let first = leaf();
        let second = leaf();
        let reference = ResourceRef::from("Leaf");
        assert!(!reference.is_linked());

        reference.link(&first);
        reference.link(&second);
        assert!(Arc::ptr_eq(&reference.resolve().unwrap(), &first));

        drop(first);
        assert!(matches!(
            reference.resolve(),
            Err(RenderError::Unlinked { name }) if name == "Leaf"
        ));
    }

    #[test]
    fn returns_doc() {
        let doc = Returns::many("all leaves", leaf()).doc();
        assert_eq!(doc["resource_name"], "Leaf");
        assert_eq!(doc["resource_type"], "resource_list");
        assert_eq!(Returns::no_content().doc()["resource_type"], "no_content");
    }
}
