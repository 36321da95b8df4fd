//! The endpoint pipeline: context creation through after-response hooks.

use std::sync::Arc;

use crate::context::{Authenticator, Context, ContextFactory};
use crate::endpoint::Endpoint;
use crate::error::{Failure, PipelineError, SchemaError};
use crate::types::{PipelineSettings, Response};

/// Runs endpoints against transport requests of type `R`.
///
/// Collaborators are fixed at construction, so one pipeline can be shared by
/// every request and tests can build independent pipelines side by side.
pub struct Pipeline<R> {
    context_factory: Arc<dyn ContextFactory<R>>,
    authenticator: Arc<dyn Authenticator>,
    settings: PipelineSettings,
}

impl<R> Clone for Pipeline<R> {
    fn clone(&self) -> Self {
        Self {
            context_factory: Arc::clone(&self.context_factory),
            authenticator: Arc::clone(&self.authenticator),
            settings: self.settings.clone(),
        }
    }
}

impl<R> std::fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<R: 'static> Pipeline<R> {
    pub fn builder() -> PipelineBuilder<R> {
        PipelineBuilder {
            context_factory: None,
            authenticator: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute `endpoint` for one request.
    ///
    /// Classified failures from context creation through rendering become
    /// `{"error": ...}` responses. CORS and after-response hooks run on
    /// every response, including error responses.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Unclassified` when a stage fails with an
    /// unclassified error, and `PipelineError::AfterResponse` when an
    /// after-response hook fails. Both are logged before returning.
    pub fn execute(&self, endpoint: &Endpoint, request: R) -> Result<Response, PipelineError> {
        let mut slot = None;
        let outcome = self.run(endpoint, request, &mut slot);
        let context = slot.unwrap_or_else(|| Context::new(endpoint.route()));

        let mut response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                let status = failure.status();
                let message = failure.to_string();
                match failure.into_response() {
                    Ok(response) => {
                        tracing::debug!(
                            endpoint = %endpoint.route(),
                            status = ?status,
                            error = %message,
                            "request failed"
                        );
                        response
                    }
                    Err(source) => {
                        tracing::error!(
                            endpoint = %endpoint.route(),
                            error = %source,
                            "unclassified failure"
                        );
                        return Err(PipelineError::Unclassified {
                            endpoint: endpoint.route().to_string(),
                            source,
                        });
                    }
                }
            }
        };

        endpoint.apply_cors(&context, &mut response);

        if let Err(source) = endpoint.run_after_response(&context, &mut response) {
            tracing::error!(
                endpoint = %endpoint.route(),
                error = %source,
                "after-response hook failed"
            );
            return Err(PipelineError::AfterResponse {
                endpoint: endpoint.route().to_string(),
                source,
            });
        }

        tracing::info!(
            endpoint = %endpoint.route(),
            status = response.status.as_u16(),
            "request complete"
        );
        Ok(response)
    }

    /// Steps 1 through 8. The context is left in `slot` once created.
    fn run(
        &self,
        endpoint: &Endpoint,
        request: R,
        slot: &mut Option<Context>,
    ) -> Result<Response, Failure> {
        let context = slot.insert(self.context_factory.create(endpoint, request)?);

        self.authenticator.authenticate(context)?;
        endpoint.patch_args(context);
        endpoint.parse_args(context)?;
        endpoint.run_before(context)?;

        let reply = endpoint.handle(context)?;
        context.handler_result = Some(reply);
        endpoint.run_after(context)?;

        let reply = context.handler_result.take().unwrap_or_default();
        let rendered = endpoint.render(context, &reply, &self.settings);
        context.handler_result = Some(reply);

        let response = rendered?;
        context.response = Some(response.clone());
        Ok(response)
    }
}

/// Builder for [`Pipeline`]. Both collaborators are required.
pub struct PipelineBuilder<R> {
    context_factory: Option<Arc<dyn ContextFactory<R>>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    settings: PipelineSettings,
}

impl<R: 'static> PipelineBuilder<R> {
    pub fn context_factory(mut self, factory: impl ContextFactory<R> + 'static) -> Self {
        self.context_factory = Some(Arc::new(factory));
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// # Errors
    ///
    /// Returns `SchemaError::MissingCollaborator` naming the first absent
    /// collaborator.
    pub fn build(self) -> Result<Pipeline<R>, SchemaError> {
        let context_factory = self.context_factory.ok_or(SchemaError::MissingCollaborator {
            what: "context factory",
        })?;
        let authenticator = self.authenticator.ok_or(SchemaError::MissingCollaborator {
            what: "authenticator",
        })?;
        Ok(Pipeline {
            context_factory,
            authenticator,
            settings: self.settings,
        })
    }
}
