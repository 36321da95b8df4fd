//! The API container: endpoints plus the resources they reach, linked once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::endpoint::{Endpoint, Handler};
use crate::error::SchemaError;
use crate::resource::{Resource, ResourceRef, ResourceRegistry};

/// A frozen set of endpoints and linked resources.
///
/// Everything reachable from an `Api` has passed the linking step, so named
/// resource references resolve for the lifetime of the value.
#[derive(Debug)]
pub struct Api {
    endpoints: Vec<Endpoint>,
    index: HashMap<String, usize>,
    registry: ResourceRegistry,
}

impl Api {
    /// Start a new API.
    ///
    /// A named resource reference links once. Register each resource with
    /// a single `Api`; a second `Api` sharing it keeps the first one's
    /// links and logs a warning.
    pub fn builder() -> ApiBuilder {
        ApiBuilder::default()
    }

    pub fn endpoint(&self, route: &str) -> Option<&Endpoint> {
        self.index.get(route).map(|&i| &self.endpoints[i])
    }

    /// Endpoints in declaration order.
    pub fn endpoints(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }

    /// Resources in registration order.
    pub fn resources(&self) -> std::slice::Iter<'_, Arc<Resource>> {
        self.registry.iter()
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }
}

#[derive(Default)]
pub struct ApiBuilder {
    resources: Vec<Arc<Resource>>,
    endpoints: Vec<Endpoint>,
}

impl ApiBuilder {
    /// Register a resource, typically one only referenced by name.
    pub fn resource(mut self, resource: Arc<Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Register everything, link forward references and check overrides.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for duplicate routes or resource names,
    /// unresolved references, and field overrides naming undeclared fields.
    pub fn build(self) -> Result<Api, SchemaError> {
        let mut registry = ResourceRegistry::new();
        for resource in &self.resources {
            registry.register(resource)?;
        }

        let mut index = HashMap::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if index.insert(endpoint.route().to_string(), i).is_some() {
                return Err(SchemaError::DuplicateRoute {
                    name: endpoint.route().to_string(),
                });
            }
            for reference in endpoint_refs(endpoint) {
                if let ResourceRef::Direct(resource) = reference {
                    registry.register(resource)?;
                }
            }
        }

        registry.link()?;

        for endpoint in &self.endpoints {
            for reference in endpoint_refs(endpoint) {
                registry.link_ref(endpoint.route(), reference)?;
            }
            let returns = endpoint.returns();
            if let Some(fields) = &returns.fields {
                let target = registry.link_ref(endpoint.route(), &returns.target)?;
                target.check_field_names(endpoint.route(), fields)?;
            }
        }

        tracing::debug!(
            endpoints = self.endpoints.len(),
            resources = registry.len(),
            "built api"
        );

        Ok(Api {
            endpoints: self.endpoints,
            index,
            registry,
        })
    }
}

fn endpoint_refs(endpoint: &Endpoint) -> Vec<&ResourceRef> {
    let mut refs = vec![&endpoint.returns().target];
    if let Handler::Patch { resource, .. } = endpoint.handler() {
        refs.push(resource);
    }
    refs
}
