//! YAML prompt templates and message rendering.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rdp_core::Animal;
use rdp_llm::ChatMessage;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::{ConfigError, OrganizationConfig};

pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    pub version: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub system_prompt: String,
    pub extraction_prompt: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1500
}

impl PromptTemplate {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let template: PromptTemplate =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        template.check(path)?;
        Ok(template)
    }

    fn check(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTemplate {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.system_prompt.trim().is_empty() {
            return Err(invalid("system_prompt is empty"));
        }
        if !self.extraction_prompt.contains("{name}") {
            return Err(invalid("extraction_prompt must reference {name}"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature must be within 0.0..=2.0"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens must be positive"));
        }
        Ok(())
    }

    /// Substitute known placeholders; any other braces (inline JSON examples) stay verbatim.
    pub fn render(&self, text: &str, animal: &Animal, org: &OrganizationConfig) -> String {
        let source_language = self
            .source_language
            .as_deref()
            .unwrap_or(&org.source_language);
        let target_language = self
            .target_language
            .as_deref()
            .unwrap_or(&org.target_language);
        let replacements = [
            ("{name}", animal.name.clone()),
            ("{breed}", animal.display_breed().to_string()),
            ("{age_text}", or_unknown(animal.age_text.as_deref())),
            ("{sex}", or_unknown(animal.sex.as_deref())),
            ("{size}", or_unknown(animal.size.as_deref())),
            ("{properties}", format_properties(&animal.properties)),
            ("{source_language}", source_language.to_string()),
            ("{target_language}", target_language.to_string()),
        ];
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            match replacements.iter().find(|(key, _)| tail.starts_with(key)) {
                Some((key, value)) => {
                    out.push_str(value);
                    rest = &tail[key.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn build_messages(&self, animal: &Animal, org: &OrganizationConfig) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.render(&self.system_prompt, animal, org)),
            ChatMessage::user(self.render(&self.extraction_prompt, animal, org)),
        ]
    }
}

fn or_unknown(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// Render the scraped properties blob as `key: value` lines for the prompt.
pub fn format_properties(properties: &JsonValue) -> String {
    let Some(map) = properties.as_object() else {
        return match properties {
            JsonValue::Null => "No additional information available.".to_string(),
            other => other.to_string(),
        };
    };

    let lines = map
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                JsonValue::Null => return None,
                JsonValue::String(s) if s.trim().is_empty() => return None,
                JsonValue::String(s) => s.trim().to_string(),
                JsonValue::Array(items) if items.is_empty() => return None,
                JsonValue::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            Some(format!("{key}: {rendered}"))
        })
        .collect::<Vec<_>>();

    if lines.is_empty() {
        "No additional information available.".to_string()
    } else {
        lines.join("\n")
    }
}

#[derive(Debug)]
struct TemplateCache {
    capacity: usize,
    entries: HashMap<PathBuf, Arc<PromptTemplate>>,
    order: VecDeque<PathBuf>,
}

impl TemplateCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, path: &Path) -> Option<Arc<PromptTemplate>> {
        let template = self.entries.get(path)?.clone();
        self.touch(path);
        Some(template)
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    fn insert(&mut self, path: PathBuf, template: Arc<PromptTemplate>) {
        if self.entries.insert(path.clone(), template).is_some() {
            self.touch(&path);
            return;
        }
        self.order.push_back(path);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(path = %evicted.display(), "evicted prompt template");
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Loads prompt templates through a bounded LRU keyed by file path.
#[derive(Debug)]
pub struct PromptBuilder {
    cache: Mutex<TemplateCache>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_CACHE_SIZE)
    }
}

impl PromptBuilder {
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: Mutex::new(TemplateCache::new(cache_size)),
        }
    }

    pub fn template(&self, path: impl AsRef<Path>) -> Result<Arc<PromptTemplate>, ConfigError> {
        let path = path.as_ref();
        if let Some(hit) = self.lock().get(path) {
            return Ok(hit);
        }
        let template = Arc::new(PromptTemplate::load(path)?);
        self.lock().insert(path.to_path_buf(), template.clone());
        Ok(template)
    }

    pub fn cached_len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TemplateCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const TEMPLATE: &str = r#"
version: "1.2"
organization: test-rescue
temperature: 0.5
max_tokens: 900
system_prompt: |
  You translate {source_language} listings into {target_language} adoption profiles.
extraction_prompt: |
  Dog name: {name}
  Breed: {breed}
  Age: {age_text}
  Details:
  {properties}
  Return JSON shaped like {"energy_level": "..."}
"#;

    fn org() -> OrganizationConfig {
        OrganizationConfig {
            id: 11,
            name: "Test Rescue".into(),
            prompt_file: "test.yaml".into(),
            source_language: "de".into(),
            target_language: "en".into(),
            model_preference: None,
            enabled: true,
        }
    }

    fn animal() -> Animal {
        serde_json::from_value(json!({
            "id": 1,
            "name": "Max",
            "organization_id": 11,
            "breed": "Mixed",
            "age_text": "2 years",
            "properties": {
                "description": "Max liebt lange Spaziergänge.",
                "vaccinated": true,
                "character": ["verspielt", "freundlich"],
                "notes": ""
            }
        }))
        .unwrap()
    }

    fn write_template(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn renders_known_placeholders_and_keeps_json_braces() {
        let template: PromptTemplate = serde_yaml::from_str(TEMPLATE).unwrap();
        let messages = template.build_messages(&animal(), &org());

        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("You translate de listings into en"));
        let user = &messages[1].content;
        assert!(user.contains("Dog name: Max"));
        assert!(user.contains("Breed: Mixed"));
        assert!(user.contains("Age: 2 years"));
        assert!(user.contains("character: verspielt, freundlich"));
        assert!(user.contains("vaccinated: true"));
        assert!(!user.contains("notes:"));
        assert!(user.contains(r#"{"energy_level": "..."}"#));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let template: PromptTemplate = serde_yaml::from_str(TEMPLATE).unwrap();
        let mut dog = animal();
        dog.name = "Max {target_language}".into();
        dog.properties = json!({"notes": "likes {name} and {unknown"});

        let rendered = template.render(&template.extraction_prompt, &dog, &org());
        assert!(rendered.contains("Dog name: Max {target_language}\n"));
        assert!(rendered.contains("notes: likes {name} and {unknown"));
        assert!(rendered.ends_with("{\"energy_level\": \"...\"}\n"));
    }

    #[test]
    fn template_without_name_placeholder_is_invalid() {
        let dir = tempdir().unwrap();
        let path = write_template(
            dir.path(),
            "bad.yaml",
            "version: '1'\nsystem_prompt: hi\nextraction_prompt: profile this dog\n",
        );
        assert!(matches!(
            PromptTemplate::load(&path),
            Err(ConfigError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn builder_caches_and_evicts_least_recently_used() {
        let dir = tempdir().unwrap();
        let a = write_template(dir.path(), "a.yaml", TEMPLATE);
        let b = write_template(dir.path(), "b.yaml", TEMPLATE);
        let c = write_template(dir.path(), "c.yaml", TEMPLATE);
        let builder = PromptBuilder::new(2);

        let first = builder.template(&a).unwrap();
        builder.template(&b).unwrap();
        let again = builder.template(&a).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        builder.template(&c).unwrap();
        assert_eq!(builder.cached_len(), 2);

        // b was least recently used, so it is reloaded from disk
        std::fs::remove_file(&b).unwrap();
        assert!(builder.template(&b).is_err());
        assert!(builder.template(&a).is_ok());
    }

    #[test]
    fn non_object_properties_fall_back_to_placeholder() {
        assert_eq!(
            format_properties(&JsonValue::Null),
            "No additional information available."
        );
        assert_eq!(
            format_properties(&json!({"empty": null})),
            "No additional information available."
        );
    }
}
