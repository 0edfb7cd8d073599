//! Base-directory resolution and the two-level (global over per-working-
//! directory) configuration store.
//!
//! Grounded on the teacher's `config.rs` constants module, expanded into a
//! real merge-and-reload store: scalars overwrite, mappings deep-merge,
//! lists fully replace, and `${NAME}` placeholders on string leaves are
//! substituted post-parse (unknown names evaluate to empty, per the
//! env-substitution contract in `utils::env`).

use crate::error::{AgoError, AgoResult};
use crate::utils::env::expand_env_vars_inline;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const AGO_HOME_ENV: &str = "AGO_HOME";
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";
pub const PROJECT_CONFIG_DIR: &str = ".ago";
pub const PROJECT_CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_T_HEALTH: Duration = Duration::from_secs(2);
pub const DEFAULT_T_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_T_KILL: Duration = Duration::from_secs(3);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_CONV: usize = 200;
pub const DEFAULT_MAX_SCRATCH: usize = 8 * 1024;
pub const DEFAULT_TURN_LIMIT: usize = 25;
pub const DEFAULT_PROMPT_HISTORY: usize = 20;
pub const DEFAULT_REASONER_PARSE_RETRIES: usize = 3;

/// A single template registry source, as found under `registries:` in config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: String,
    pub kind: RegistryKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token_ref: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryKind {
    Builtin,
    Http,
    GithubLike,
    GitlabLike,
}

/// A template resolution layer name, as used in `template_resolution_order`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TemplateLayer {
    Local,
    Builtin,
    Pulled,
}

fn default_layer_order() -> Vec<TemplateLayer> {
    vec![TemplateLayer::Local, TemplateLayer::Pulled, TemplateLayer::Builtin]
}

/// The merged, typed view of `config.yaml`. Constructed from the raw
/// deep-merged YAML `Value` so unknown keys in either file don't break
/// loading — they just don't round-trip into this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_layer_order")]
    pub template_resolution_order: Vec<TemplateLayer>,
    #[serde(default)]
    pub registries: Vec<RegistryEntry>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_model: default_model(),
            template_resolution_order: default_layer_order(),
            registries: Vec::new(),
        }
    }
}

/// Resolve the per-user base directory: `$AGO_HOME` if set, else `$HOME/.ago`.
pub fn base_dir() -> AgoResult<PathBuf> {
    if let Ok(dir) = std::env::var(AGO_HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| AgoError::BaseDirInaccessible {
        path: PathBuf::from("$HOME"),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"),
    })?;
    Ok(home.join(".ago"))
}

/// Ensure the base directory and its standard subdirectories exist with
/// owner-only permissions on Unix.
pub fn ensure_base_dir(base: &Path) -> AgoResult<()> {
    for sub in ["", "processes", "logs", "registry/templates/builtin", "registry/templates/pulled"] {
        let dir = if sub.is_empty() { base.to_path_buf() } else { base.join(sub) };
        std::fs::create_dir_all(&dir).map_err(|source| AgoError::BaseDirInaccessible {
            path: dir.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
        }
    }
    Ok(())
}

/// The reloadable configuration handle the daemon holds. `reload()` re-reads
/// both files from disk; `config set` rewrites the owning file then calls
/// `reload()` so the daemon's view invalidates without a restart.
pub struct ConfigStore {
    base_dir: PathBuf,
    project_dir: Option<PathBuf>,
    current: Config,
}

impl ConfigStore {
    pub fn load(base_dir: PathBuf, project_dir: Option<PathBuf>) -> AgoResult<Self> {
        let current = load_merged(&base_dir, project_dir.as_deref())?;
        Ok(ConfigStore { base_dir, project_dir, current })
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    pub fn reload(&mut self) -> AgoResult<()> {
        self.current = load_merged(&self.base_dir, self.project_dir.as_deref())?;
        Ok(())
    }

    fn global_path(&self) -> PathBuf {
        self.base_dir.join(GLOBAL_CONFIG_FILE)
    }

    /// Write a single scalar key (dotted path, e.g. `default_model`) into the
    /// global config file and reload.
    pub fn set_global(&mut self, key: &str, value: &str) -> AgoResult<()> {
        let path = self.global_path();
        let mut root = read_yaml_or_empty(&path)?;
        set_dotted(&mut root, key, Value::String(value.to_string()));
        write_yaml(&path, &root)?;
        self.reload()
    }

    pub fn get(&self, key: &str) -> AgoResult<Option<String>> {
        let path = self.global_path();
        let root = read_yaml_or_empty(&path)?;
        Ok(get_dotted(&root, key).map(|v| yaml_scalar_to_string(v)))
    }

    /// Add a registry, or update its url if one with this name already
    /// exists. Goes through the typed `Config` rather than `set_dotted`
    /// because `registries` is a list, not a nested mapping.
    pub fn upsert_registry(&mut self, name: &str, url: &str) -> AgoResult<()> {
        let path = self.global_path();
        let mut config = self.read_global_config()?;
        match config.registries.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.url = Some(url.to_string()),
            None => config.registries.push(RegistryEntry {
                name: name.to_string(),
                kind: RegistryKind::Http,
                url: Some(url.to_string()),
                token_ref: None,
                priority: 0,
                enabled: true,
            }),
        }
        write_yaml(&path, &serde_yaml::to_value(&config)?)?;
        self.reload()
    }

    pub fn remove_registry(&mut self, name: &str) -> AgoResult<()> {
        let path = self.global_path();
        let mut config = self.read_global_config()?;
        config.registries.retain(|r| r.name != name);
        write_yaml(&path, &serde_yaml::to_value(&config)?)?;
        self.reload()
    }

    fn read_global_config(&self) -> AgoResult<Config> {
        let root = read_yaml_or_empty(&self.global_path())?;
        serde_yaml::from_value(root).map_err(AgoError::from)
    }
}

fn load_merged(base_dir: &Path, project_dir: Option<&Path>) -> AgoResult<Config> {
    let global_path = base_dir.join(GLOBAL_CONFIG_FILE);
    let global = read_yaml_or_empty(&global_path)?;

    let merged = if let Some(proj) = project_dir {
        let project_path = proj.join(PROJECT_CONFIG_DIR).join(PROJECT_CONFIG_FILE);
        let project = read_yaml_or_empty(&project_path)?;
        deep_merge(global, project)
    } else {
        global
    };

    let substituted = substitute_env_in_value(merged);
    serde_yaml::from_value(substituted).map_err(AgoError::from)
}

fn read_yaml_or_empty(path: &Path) -> AgoResult<Value> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(serde_yaml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Mapping(Default::default())),
        Err(e) => Err(e.into()),
    }
}

fn write_yaml(path: &Path, value: &Value) -> AgoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_yaml::to_string(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Two-level merge: scalars overwrite, mappings deep-merge, lists fully
/// replace. `overlay` wins (it is the per-working-directory file).
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, overlay_v) in overlay_map {
                let merged_v = match base_map.remove(&k) {
                    Some(base_v) => deep_merge(base_v, overlay_v),
                    None => overlay_v,
                };
                base_map.insert(k, merged_v);
            }
            Value::Mapping(base_map)
        }
        // Lists fully replace; any other scalar-vs-anything case also just
        // takes the overlay's value.
        (_, overlay) => overlay,
    }
}

fn substitute_env_in_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars_inline(&s)),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (substitute_env_in_value(k), substitute_env_in_value(v)))
                .collect(),
        ),
        Value::Sequence(seq) => {
            Value::Sequence(seq.into_iter().map(substitute_env_in_value).collect())
        }
        other => other,
    }
}

fn set_dotted(root: &mut Value, key: &str, value: Value) {
    if !matches!(root, Value::Mapping(_)) {
        *root = Value::Mapping(Default::default());
    }
    let Value::Mapping(map) = root else { unreachable!() };
    let mut parts = key.splitn(2, '.');
    let head = parts.next().unwrap();
    match parts.next() {
        Some(rest) => {
            let entry = map
                .entry(Value::String(head.to_string()))
                .or_insert_with(|| Value::Mapping(Default::default()));
            set_dotted(entry, rest, value);
        }
        None => {
            map.insert(Value::String(head.to_string()), value);
        }
    }
}

fn get_dotted<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in key.split('.') {
        current = current.as_mapping()?.get(Value::String(part.to_string()))?;
    }
    Some(current)
}

fn yaml_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// A raw name → (optional) path-overridable lookup table, used when the CLI
/// front-end needs to render `config show` without the typed `Config`
/// struct hiding unknown keys.
pub type RawConfig = HashMap<String, Value>;
