//! Role compiler
//!
//! Maps one validated blueprint component to one plan step. Roles are looked up
//! by key in a [`RoleRegistry`]; a role may intercept specific parameter names
//! with a [`ParameterHandler`] before the default flattening applies.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::WorkerError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::models::blueprint::{BlueprintParameter, ParamValue};

/// One role entry of the generated plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub role: String,
    pub vars: BTreeMap<String, ParamValue>,
}

/// Builds the plan step for one role
#[async_trait]
pub trait RoleBuilder: Send + Sync {
    /// Role name emitted into the plan
    fn role_name(&self) -> &str;

    /// Compile a component's parameters into a plan step
    async fn compile(
        &self,
        parameters: &[BlueprintParameter],
        work_dir: &Path,
    ) -> Result<PlanStep, WorkerError>;
}

/// Side-effecting transform for a single named parameter
#[async_trait]
pub trait ParameterHandler: Send + Sync {
    /// Return the variables that replace the raw parameter
    async fn handle(
        &self,
        role_name: &str,
        value: &ParamValue,
        work_dir: &Path,
    ) -> Result<Vec<(String, ParamValue)>, WorkerError>;
}

/// Role that copies every parameter into its variables, except those claimed by a handler
pub struct FlatRole {
    role_name: String,
    handlers: HashMap<String, Arc<dyn ParameterHandler>>,
}

impl FlatRole {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Route the named parameter through `handler`
    pub fn with_handler(mut self, parameter: impl Into<String>, handler: Arc<dyn ParameterHandler>) -> Self {
        self.handlers.insert(parameter.into(), handler);
        self
    }
}

#[async_trait]
impl RoleBuilder for FlatRole {
    fn role_name(&self) -> &str {
        &self.role_name
    }

    async fn compile(
        &self,
        parameters: &[BlueprintParameter],
        work_dir: &Path,
    ) -> Result<PlanStep, WorkerError> {
        let mut vars = BTreeMap::new();

        for param in parameters {
            match self.handlers.get(&param.name) {
                Some(handler) => {
                    debug!("Running handler for {} ({})", param.name, self.role_name);
                    let produced = handler.handle(&self.role_name, &param.value, work_dir).await?;
                    vars.extend(produced);
                }
                None => {
                    vars.insert(param.name.clone(), param.value.clone());
                }
            }
        }

        Ok(PlanStep {
            role: self.role_name.clone(),
            vars,
        })
    }
}

/// Downloads a `{filepath, url}` override file next to the plan.
///
/// The file lands in `<work_dir>/overrides/<role>/<filepath>`; the handler emits
/// `<var>: true` and `<var>_file: <absolute written path>`.
pub struct OverrideFileHandler {
    var_name: String,
    http: Arc<HttpClient>,
}

impl OverrideFileHandler {
    pub fn new(var_name: impl Into<String>, http: Arc<HttpClient>) -> Self {
        Self {
            var_name: var_name.into(),
            http,
        }
    }
}

#[async_trait]
impl ParameterHandler for OverrideFileHandler {
    async fn handle(
        &self,
        role_name: &str,
        value: &ParamValue,
        work_dir: &Path,
    ) -> Result<Vec<(String, ParamValue)>, WorkerError> {
        let (filepath, url) = match (value.str_field("filepath"), value.str_field("url")) {
            (Some(filepath), Some(url)) => (filepath, url),
            _ => {
                return Err(WorkerError::ValidationError(format!(
                    "parameter {} expects an object with filepath and url, got: {}",
                    self.var_name, value
                )))
            }
        };

        let relative = Path::new(filepath);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(WorkerError::ValidationError(format!(
                "parameter {} has an unsafe filepath: {}",
                self.var_name, filepath
            )));
        }

        // The executor resolves paths from the run directory, not ours.
        let target = std::path::absolute(work_dir.join("overrides").join(role_name).join(relative))?;
        let contents = self.http.download(url).await?;
        File::new(&target).write_bytes(&contents).await?;

        info!("Saved override file for {} to {}", role_name, target.display());

        Ok(vec![
            (self.var_name.clone(), ParamValue::Bool(true)),
            (
                format!("{}_file", self.var_name),
                ParamValue::String(target.to_string_lossy().into_owned()),
            ),
        ])
    }
}

/// Registry of role builders keyed by the component's role key
#[derive(Default)]
pub struct RoleRegistry {
    builders: HashMap<String, Arc<dyn RoleBuilder>>,
}

impl RoleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every role the worker ships with
    pub fn with_builtin_roles(http: Arc<HttpClient>) -> Self {
        let mut registry = Self::new();

        let nginx = FlatRole::new("nginxinc.nginx").with_handler(
            "nginx_service_custom",
            Arc::new(OverrideFileHandler::new("nginx_service_custom", http)),
        );
        registry.register("nginxinc.nginx", Arc::new(nginx));

        for role in [
            "clouding.Docker",
            "clouding.Java",
            "clouding.Nginx",
            "clouding.OpenPort",
            "clouding.AddNginxSite",
        ] {
            registry.register(role, Arc::new(FlatRole::new(role)));
        }

        registry
    }

    /// Register a builder; an existing key is replaced
    pub fn register(&mut self, key: impl Into<String>, builder: Arc<dyn RoleBuilder>) {
        self.builders.insert(key.into(), builder);
    }

    /// Check whether a role key is known
    pub fn contains(&self, key: &str) -> bool {
        self.builders.contains_key(key)
    }

    /// Compile parameters with the builder registered under `key`
    pub async fn compile(
        &self,
        key: &str,
        parameters: &[BlueprintParameter],
        work_dir: &Path,
    ) -> Result<PlanStep, WorkerError> {
        let builder = self
            .builders
            .get(key)
            .ok_or_else(|| WorkerError::UnsupportedRole(key.to_string()))?;
        builder.compile(parameters, work_dir).await
    }
}
