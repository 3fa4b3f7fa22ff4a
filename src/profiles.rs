#![allow(clippy::module_name_repetitions)]
//! Profiles and model definitions loaded from YAML with fall-through search.
//!
//! Profile search order (first enabled match wins):
//! 1) <config>/user.profiles.yaml
//! 2) <config>/profiles.yaml
//! 3) <builtin>/user.profiles.yaml
//! 4) <builtin>/profiles.yaml
//!
//! An entry that is null/false/empty, or carries `model: null|false`, is disabled and
//! the search continues with the next file.
//!
//! Model definitions come from <builtin>/models.yaml then <config>/models.yaml
//! (later files override by `model_name`). `always_include` lists baseline models that
//! every profile's model set carries.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// A LiteLLM model definition as registered with the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelDef {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub litellm_params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileMeta {
    pub name: String,
    pub opus_model: String,
    pub sonnet_model: String,
    pub haiku_model: String,
}

impl ProfileMeta {
    /// Tier model names in opus, sonnet, haiku order, skipping unset tiers.
    pub fn tier_models(&self) -> Vec<&str> {
        [&self.opus_model, &self.sonnet_model, &self.haiku_model]
            .into_iter()
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub meta: ProfileMeta,
    pub model_list: Vec<ModelDef>,
    pub source_path: Option<PathBuf>,
}

impl Profile {
    pub fn model_names(&self) -> Vec<String> {
        self.model_list.iter().map(|m| m.model_name.clone()).collect()
    }

    /// Tier models that have no definition and were dropped during resolution.
    pub fn unresolved_tiers(&self) -> Vec<String> {
        let have: BTreeSet<&str> = self.model_list.iter().map(|m| m.model_name.as_str()).collect();
        self.meta
            .tier_models()
            .into_iter()
            .filter(|n| !have.contains(n))
            .map(|n| n.to_string())
            .collect()
    }
}

/// Resolve a profile name to its profile (and therefore its model set).
pub trait ProfileResolver {
    fn resolve(&mut self, name: &str) -> Option<Profile>;
}

#[derive(Debug, Default, Clone, Deserialize)]
struct ModelsFile {
    #[serde(default)]
    model_list: Vec<ModelDef>,
    #[serde(default)]
    always_include: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ModelDefinitions {
    pub by_name: BTreeMap<String, ModelDef>,
    pub always_include: Vec<String>,
}

/// Profile/model catalog with an explicit, per-instance parse cache.
#[derive(Debug)]
pub struct ProfileCatalog {
    config_dir: PathBuf,
    builtin_dir: PathBuf,
    files: HashMap<PathBuf, serde_yaml::Mapping>,
    models: Option<ModelDefinitions>,
}

impl ProfileCatalog {
    pub fn new(config_dir: impl Into<PathBuf>, builtin_dir: impl Into<PathBuf>) -> Self {
        ProfileCatalog {
            config_dir: config_dir.into(),
            builtin_dir: builtin_dir.into(),
            files: HashMap::new(),
            models: None,
        }
    }

    pub fn from_env() -> Self {
        ProfileCatalog::new(crate::paths::config_dir(), crate::paths::builtin_dir())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn builtin_dir(&self) -> &Path {
        &self.builtin_dir
    }

    /// Drop every cached file so the next lookup re-reads from disk.
    pub fn invalidate(&mut self) {
        self.files.clear();
        self.models = None;
    }

    /// Existing profile files in priority order (highest first).
    pub fn profile_files(&self) -> Vec<PathBuf> {
        [
            self.config_dir.join("user.profiles.yaml"),
            self.config_dir.join("profiles.yaml"),
            self.builtin_dir.join("user.profiles.yaml"),
            self.builtin_dir.join("profiles.yaml"),
        ]
        .into_iter()
        .filter(|p| p.is_file())
        .collect()
    }

    /// Existing model files in override order (lowest first).
    pub fn model_files(&self) -> Vec<PathBuf> {
        [
            self.builtin_dir.join("models.yaml"),
            self.config_dir.join("models.yaml"),
        ]
        .into_iter()
        .filter(|p| p.is_file())
        .collect()
    }

    fn profiles_mapping(&mut self, path: &Path) -> &serde_yaml::Mapping {
        self.files.entry(path.to_path_buf()).or_insert_with(|| {
            let parsed = fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|t| serde_yaml::from_str::<Value>(&t).map_err(|e| e.to_string()));
            match parsed {
                Ok(Value::Mapping(m)) => m,
                Ok(_) => serde_yaml::Mapping::new(),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable profiles file");
                    serde_yaml::Mapping::new()
                }
            }
        })
    }

    pub fn model_definitions(&mut self) -> &ModelDefinitions {
        if self.models.is_none() {
            let mut defs = ModelDefinitions::default();
            for path in self.model_files() {
                let parsed: Result<ModelsFile, String> = fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|t| {
                        if t.trim().is_empty() {
                            Ok(ModelsFile::default())
                        } else {
                            serde_yaml::from_str(&t).map_err(|e| e.to_string())
                        }
                    });
                match parsed {
                    Ok(file) => {
                        for m in file.model_list {
                            if !m.model_name.is_empty() {
                                defs.by_name.insert(m.model_name.clone(), m);
                            }
                        }
                        for name in file.always_include {
                            if !defs.always_include.contains(&name) {
                                defs.always_include.push(name);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable models file");
                    }
                }
            }
            self.models = Some(defs);
        }
        self.models.get_or_insert_with(ModelDefinitions::default)
    }

    pub fn model_definition(&mut self, name: &str) -> Option<ModelDef> {
        self.model_definitions().by_name.get(name).cloned()
    }

    pub fn list_models(&mut self) -> Vec<String> {
        self.model_definitions().by_name.keys().cloned().collect()
    }

    /// All enabled profile names across every file, sorted.
    pub fn list_profiles(&mut self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for path in self.profile_files() {
            for (k, v) in self.profiles_mapping(&path) {
                if let Some(name) = k.as_str() {
                    if !is_profile_disabled(v) {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        names.into_iter().collect()
    }

    /// Load a profile by name with fall-through and resolve its model set.
    pub fn load_profile(&mut self, name: &str) -> Option<Profile> {
        for path in self.profile_files() {
            let entry = self.profiles_mapping(&path).get(name).cloned();
            let Some(entry) = entry else { continue };
            if is_profile_disabled(&entry) {
                tracing::debug!(profile = name, path = %path.display(), "profile disabled here; continuing search");
                continue;
            }
            let meta = meta_from_entry(name, &entry);
            let mut profile = Profile {
                meta,
                model_list: Vec::new(),
                source_path: Some(path.clone()),
            };
            profile.model_list = self.resolve_models(&profile.meta);
            tracing::debug!(profile = name, path = %path.display(), models = profile.model_list.len(), "loaded profile");
            return Some(profile);
        }
        tracing::debug!(profile = name, "profile not found in any file");
        None
    }

    /// Tier models (deduplicated, definitions required) followed by baseline models.
    pub fn resolve_models(&mut self, meta: &ProfileMeta) -> Vec<ModelDef> {
        let defs = self.model_definitions();
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();
        let names = meta
            .tier_models()
            .into_iter()
            .map(|s| s.to_string())
            .chain(defs.always_include.iter().cloned());
        for name in names {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(def) = defs.by_name.get(&name) {
                resolved.push(def.clone());
            }
        }
        resolved
    }

    /// Path of the first file providing an enabled entry for `name`.
    pub fn profile_path(&mut self, name: &str) -> Option<PathBuf> {
        for path in self.profile_files() {
            if let Some(v) = self.profiles_mapping(&path).get(name) {
                if !is_profile_disabled(v) {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl ProfileResolver for ProfileCatalog {
    fn resolve(&mut self, name: &str) -> Option<Profile> {
        self.load_profile(name)
    }
}

/// Disabled: null/false/empty entries, or an explicit `model: null|false`.
pub fn is_profile_disabled(entry: &Value) -> bool {
    match entry {
        Value::Null | Value::Bool(false) => true,
        Value::Mapping(m) => {
            if m.is_empty() {
                return true;
            }
            matches!(m.get("model"), Some(Value::Null) | Some(Value::Bool(false)))
        }
        Value::String(s) => s.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        _ => false,
    }
}

fn meta_from_entry(name: &str, entry: &Value) -> ProfileMeta {
    let data = entry.get("meta").unwrap_or(entry);
    let field = |key: &str| -> String {
        data.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let mut meta = ProfileMeta {
        name: field("name"),
        opus_model: field("opus_model"),
        sonnet_model: field("sonnet_model"),
        haiku_model: field("haiku_model"),
    };
    if meta.name.is_empty() {
        meta.name = name.to_string();
    }
    meta
}

/// Static in-memory resolver, handy for callers that already know the model sets.
#[derive(Debug, Default, Clone)]
pub struct StaticProfiles {
    profiles: BTreeMap<String, Profile>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        StaticProfiles::default()
    }

    /// Register a profile whose model set is exactly `models` (no litellm params).
    pub fn with_models(mut self, name: &str, models: &[&str]) -> Self {
        let profile = Profile {
            meta: ProfileMeta {
                name: name.to_string(),
                ..ProfileMeta::default()
            },
            model_list: models
                .iter()
                .map(|m| ModelDef {
                    model_name: m.to_string(),
                    litellm_params: serde_json::Map::new(),
                })
                .collect(),
            source_path: None,
        };
        self.profiles.insert(name.to_string(), profile);
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.profiles.remove(name);
    }
}

impl ProfileResolver for StaticProfiles {
    fn resolve(&mut self, name: &str) -> Option<Profile> {
        self.profiles.get(name).cloned()
    }
}
