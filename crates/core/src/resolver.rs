//! Configuration resolution: system + runtime + template → [`RunSnapshot`].

use crate::config::{RunSnapshot, RuntimeConfig, SystemConfig, TemplateId};
use crate::error::AssistError;

/// Produces run snapshots for one deployment.
///
/// The template is pinned at construction; requests naming any other template are
/// rejected. Resolution is pure: identical inputs give structurally equal snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigResolver {
    template: TemplateId,
}

impl ConfigResolver {
    pub fn new(template: TemplateId) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    pub fn resolve(
        &self,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
        template: &TemplateId,
    ) -> Result<RunSnapshot, AssistError> {
        if template != &self.template {
            return Err(AssistError::invalid_config(format!(
                "template {template} is fixed to {} for this deployment",
                self.template
            )));
        }
        system.validate()?;

        Ok(RunSnapshot::new(self.template.clone(), *runtime, *system))
    }

    /// Resolve against the deployment's own template.
    pub fn resolve_default(
        &self,
        system: &SystemConfig,
        runtime: &RuntimeConfig,
    ) -> Result<RunSnapshot, AssistError> {
        self.resolve(system, runtime, &self.template)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(TemplateId::default())
    }
}
