//! Template provider
//!
//! Named JSON files under `{base}/templates/` that pre-fill CA and signing
//! requests. Loading a template that does not exist yields the built-in
//! defaults instead of an error.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authority_store::CaRequest;
use crate::error::{CerticaError, Result};
use crate::layout::{validate_name, Layout};
use crate::repository::{ArtifactRepository, FileMode};
use crate::signing::SigningRequest;

pub const DEFAULT_TEMPLATE: &str = "default";
const TEMPLATE_EXTENSION: &str = ".json";

/// Default subject fields and sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub organization: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub default_validity_days: u32,
    pub default_key_size: u32,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            organization: "Development".to_string(),
            country: "CN".to_string(),
            state: "Beijing".to_string(),
            city: "Beijing".to_string(),
            default_validity_days: 365,
            default_key_size: 2048,
        }
    }
}

impl Template {
    /// Overwrite the subject fields and sizes of a CA request
    pub fn apply_to_ca(&self, request: CaRequest) -> CaRequest {
        request
            .organization(&self.organization)
            .country(&self.country)
            .state(&self.state)
            .city(&self.city)
            .validity_days(self.default_validity_days)
            .key_size(self.default_key_size)
    }

    /// Overwrite the subject fields and sizes of a signing request
    pub fn apply_to_signing(&self, request: SigningRequest) -> SigningRequest {
        request
            .organization(&self.organization)
            .country(&self.country)
            .state(&self.state)
            .city(&self.city)
            .validity_days(self.default_validity_days)
            .key_size(self.default_key_size)
    }
}

pub struct TemplateStore {
    layout: Layout,
    repository: Arc<dyn ArtifactRepository>,
}

impl TemplateStore {
    pub fn new(layout: Layout, repository: Arc<dyn ArtifactRepository>) -> Self {
        Self { layout, repository }
    }

    /// Write `template` as `{name}.json`, replacing any existing file
    pub fn create_template(&self, name: &str, template: &Template) -> Result<PathBuf> {
        validate_name("template", name)?;
        let json = serde_json::to_vec_pretty(template)
            .map_err(|e| CerticaError::config(format!("failed to encode template: {e}")))?;
        self.repository.create_dir_all(&self.layout.templates_root())?;
        let path = self.layout.template_path(name);
        self.repository.write_replace(&path, &json, FileMode::Public)?;
        info!(template = %name, path = %path.display(), "Template saved");
        Ok(path)
    }

    /// Load `name` (or `default`), returning built-in defaults when absent
    pub fn load_template(&self, name: Option<&str>) -> Result<Template> {
        let name = name.unwrap_or(DEFAULT_TEMPLATE);
        validate_name("template", name)?;
        let path = self.layout.template_path(name);
        if !self.repository.exists(&path) {
            debug!(template = %name, "Template not found; using built-in defaults");
            return Ok(Template::default());
        }
        let bytes = self.repository.read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CerticaError::config(format!("{}: {e}", path.display())))
    }

    /// Template names, sorted
    pub fn list_templates(&self) -> Result<Vec<String>> {
        let files = self.repository.list_files(&self.layout.templates_root())?;
        Ok(files
            .iter()
            .filter(|file| !file.starts_with('.'))
            .filter_map(|file| file.strip_suffix(TEMPLATE_EXTENSION))
            .map(str::to_string)
            .collect())
    }

    /// Returns whether the template existed
    pub fn delete_template(&self, name: &str) -> Result<bool> {
        validate_name("template", name)?;
        self.repository.remove_file(&self.layout.template_path(name))
    }
}
