//! Organization registry: which prompt template, language pair and model each rescue uses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const ORGANIZATIONS_FILE: &str = "config/organizations.yaml";
pub const PROMPTS_DIR: &str = "prompts/organizations";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no organization config for id {0}")]
    UnknownOrganization(i64),
    #[error("organization {0} is disabled for profiling")]
    DisabledOrganization(i64),
    #[error("organization id {0} is configured more than once")]
    DuplicateOrganization(i64),
    #[error("prompt template for organization {org_id} not found at {path}")]
    MissingPromptTemplate { org_id: i64, path: PathBuf },
    #[error("invalid prompt template {path}: {reason}")]
    InvalidTemplate { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    pub id: i64,
    pub name: String,
    pub prompt_file: String,
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default)]
    pub model_preference: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "en".to_string()
}

fn default_enabled() -> bool {
    true
}

impl OrganizationConfig {
    pub fn prompt_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(PROMPTS_DIR).join(&self.prompt_file)
    }

    pub fn needs_translation(&self) -> bool {
        !self.source_language.eq_ignore_ascii_case(&self.target_language)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OrganizationsFile {
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<u32>,
    organizations: Vec<OrganizationConfig>,
}

/// In-memory registry loaded from `config/organizations.yaml`; refreshed only by [`reload`](Self::reload).
#[derive(Debug, Clone)]
pub struct OrganizationConfigLoader {
    workspace_root: PathBuf,
    organizations: BTreeMap<i64, OrganizationConfig>,
}

impl OrganizationConfigLoader {
    pub fn from_workspace_root(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let workspace_root = root.into();
        let organizations = read_organizations(&workspace_root)?;
        Ok(Self {
            workspace_root,
            organizations,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Enabled organization by id.
    pub fn get(&self, org_id: i64) -> Result<&OrganizationConfig, ConfigError> {
        let config = self
            .organizations
            .get(&org_id)
            .ok_or(ConfigError::UnknownOrganization(org_id))?;
        if !config.enabled {
            return Err(ConfigError::DisabledOrganization(org_id));
        }
        Ok(config)
    }

    pub fn all(&self) -> impl Iterator<Item = &OrganizationConfig> {
        self.organizations.values()
    }

    /// Path of the org's prompt template, failing if the file is absent.
    pub fn prompt_path(&self, org_id: i64) -> Result<PathBuf, ConfigError> {
        let path = self.get(org_id)?.prompt_path(&self.workspace_root);
        if !path.is_file() {
            return Err(ConfigError::MissingPromptTemplate { org_id, path });
        }
        Ok(path)
    }

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.organizations = read_organizations(&self.workspace_root)?;
        info!(count = self.organizations.len(), "reloaded organization configs");
        Ok(())
    }
}

fn read_organizations(root: &Path) -> Result<BTreeMap<i64, OrganizationConfig>, ConfigError> {
    let path = root.join(ORGANIZATIONS_FILE);
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let file: OrganizationsFile =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;

    let mut organizations = BTreeMap::new();
    for org in file.organizations {
        let id = org.id;
        if organizations.insert(id, org).is_some() {
            return Err(ConfigError::DuplicateOrganization(id));
        }
    }
    Ok(organizations)
}
