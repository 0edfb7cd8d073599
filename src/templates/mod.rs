//! Template registry (§C2): discover, resolve, and load agent templates by
//! name across three precedence layers.
//!
//! Grounded on the teacher's `RoleManager` (markdown-file discovery with
//! canonicalize-and-starts_with path-traversal protection), generalised to
//! YAML templates across the `local` / `pulled` / `builtin` layers named in
//! the filesystem layout. Deliberately does **not** reuse the teacher's
//! `builtin.rs` embedding (`include_str!`): the set of built-in templates
//! must be discovered at a fixed on-disk location, never compiled in.

use crate::config::TemplateLayer;
use crate::error::{AgoError, AgoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const TEMPLATE_FILE_EXTENSION: &str = "yaml";

/// An immutable, loaded agent template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub tools: Vec<String>,
    pub prompt: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A lightweight, listing-only view of a template, annotated with which
/// layer it was found in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub layer: TemplateLayer,
}

/// Resolves templates across the three on-disk layers in the order given
/// by configuration (default: local → pulled → builtin).
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    local_dir: PathBuf,
    pulled_dir: PathBuf,
    builtin_dir: PathBuf,
}

impl TemplateRegistry {
    /// `local_dir` is the current working directory (project-local
    /// templates live directly in it, not in a subdirectory); `pulled_dir`
    /// and `builtin_dir` are under the base directory's
    /// `registry/templates/{pulled,builtin}`.
    pub fn new(local_dir: PathBuf, pulled_dir: PathBuf, builtin_dir: PathBuf) -> Self {
        TemplateRegistry { local_dir, pulled_dir, builtin_dir }
    }

    fn dir_for(&self, layer: TemplateLayer) -> &Path {
        match layer {
            TemplateLayer::Local => &self.local_dir,
            TemplateLayer::Pulled => &self.pulled_dir,
            TemplateLayer::Builtin => &self.builtin_dir,
        }
    }

    /// Resolve `name` by searching layers in `order`. First hit wins.
    pub fn resolve(&self, name: &str, order: &[TemplateLayer]) -> AgoResult<Template> {
        for &layer in order {
            let dir = self.dir_for(layer);
            let candidate = dir.join(format!("{name}.{TEMPLATE_FILE_EXTENSION}"));
            if candidate.is_file() {
                return self.load_checked(&candidate, dir);
            }
        }
        Err(AgoError::NoSuchTemplate(name.to_string()))
    }

    /// Enumerate every layer, deduplicating by name and keeping the entry
    /// from the highest-precedence layer per `order`.
    pub fn list(&self, order: &[TemplateLayer]) -> AgoResult<Vec<TemplateSummary>> {
        let mut by_name: HashMap<String, TemplateSummary> = HashMap::new();

        // Iterate in reverse precedence so a later (higher-precedence)
        // insert simply overwrites an earlier one.
        for &layer in order.iter().rev() {
            let dir = self.dir_for(layer);
            if !dir.is_dir() {
                continue; // a missing builtin/pulled directory is not fatal
            }
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if !is_template_file(&path) {
                    continue;
                }
                let template = match self.load_checked(&path, dir) {
                    Ok(t) => t,
                    Err(_) => continue, // skip unparsable files rather than fail list()
                };
                by_name.insert(
                    template.name.clone(),
                    TemplateSummary {
                        name: template.name,
                        version: template.version,
                        description: template.description,
                        layer,
                    },
                );
            }
        }

        let mut summaries: Vec<_> = by_name.into_values().collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Parse a structured template file into a [`Template`].
    pub fn load(&self, path: &Path) -> AgoResult<Template> {
        let text = fs::read_to_string(path).map_err(|e| AgoError::BadTemplate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        parse_template(&text, path)
    }

    /// Materialise an already-resolved remote template body into the
    /// `pulled` layer. The core never fetches from a git forge itself
    /// (§1) — the CLI front-end resolves the bytes externally and hands
    /// them to this method via the `pull` control operation.
    pub fn pull(&self, name: &str, body: &str) -> AgoResult<Template> {
        let template = parse_template(body, Path::new(name))?;
        if template.name != name {
            return Err(AgoError::BadTemplate {
                path: PathBuf::from(name),
                reason: format!(
                    "pulled template declares name {:?} but was requested as {:?}",
                    template.name, name
                ),
            });
        }
        fs::create_dir_all(&self.pulled_dir)?;
        let dest = self.pulled_dir.join(format!("{name}.{TEMPLATE_FILE_EXTENSION}"));
        fs::write(&dest, body)?;
        Ok(template)
    }

    fn load_checked(&self, path: &Path, layer_dir: &Path) -> AgoResult<Template> {
        let canonical_dir = fs::canonicalize(layer_dir).map_err(|e| AgoError::BadTemplate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let canonical_path = fs::canonicalize(path).map_err(|e| AgoError::BadTemplate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !canonical_path.starts_with(&canonical_dir) {
            return Err(AgoError::BadTemplate {
                path: canonical_path,
                reason: "template file resolved outside its declared layer directory".to_string(),
            });
        }
        self.load(&canonical_path)
    }
}

fn is_template_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(TEMPLATE_FILE_EXTENSION))
            .unwrap_or(false)
}

fn parse_template(text: &str, path: &Path) -> AgoResult<Template> {
    serde_yaml::from_str::<Template>(text).map_err(|e| AgoError::BadTemplate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_template(dir: &Path, name: &str, extra: &str) {
        let body = format!(
            "name: {name}\nmodel: gpt-4o-mini\nprompt: |\n  You are {name}.\n{extra}"
        );
        fs::write(dir.join(format!("{name}.{TEMPLATE_FILE_EXTENSION}")), body).unwrap();
    }

    fn registry() -> (TempDir, TempDir, TempDir, TemplateRegistry) {
        let local = TempDir::new().unwrap();
        let pulled = TempDir::new().unwrap();
        let builtin = TempDir::new().unwrap();
        let reg = TemplateRegistry::new(
            local.path().to_path_buf(),
            pulled.path().to_path_buf(),
            builtin.path().to_path_buf(),
        );
        (local, pulled, builtin, reg)
    }

    #[test]
    fn resolve_missing_is_no_such_template() {
        let (_l, _p, _b, reg) = registry();
        let err = reg.resolve("ghost", &[TemplateLayer::Local]).unwrap_err();
        assert!(matches!(err, AgoError::NoSuchTemplate(name) if name == "ghost"));
    }

    #[test]
    fn local_wins_over_builtin_when_ordered_first() {
        let (local, _p, builtin, reg) = registry();
        write_template(local.path(), "writer", "description: LOCAL\n");
        write_template(builtin.path(), "writer", "description: BUILTIN\n");

        let order = [TemplateLayer::Local, TemplateLayer::Builtin];
        let resolved = reg.resolve("writer", &order).unwrap();
        assert_eq!(resolved.description, "LOCAL");
    }

    #[test]
    fn builtin_wins_when_ordered_first() {
        let (local, _p, builtin, reg) = registry();
        write_template(local.path(), "writer", "description: LOCAL\n");
        write_template(builtin.path(), "writer", "description: BUILTIN\n");

        let order = [TemplateLayer::Builtin, TemplateLayer::Local];
        let resolved = reg.resolve("writer", &order).unwrap();
        assert_eq!(resolved.description, "BUILTIN");
    }

    #[test]
    fn list_deduplicates_keeping_highest_precedence() {
        let (local, _p, builtin, reg) = registry();
        write_template(local.path(), "writer", "description: LOCAL\n");
        write_template(builtin.path(), "writer", "description: BUILTIN\n");
        write_template(builtin.path(), "researcher", "description: R\n");

        let order = [TemplateLayer::Local, TemplateLayer::Pulled, TemplateLayer::Builtin];
        let list = reg.list(&order).unwrap();
        assert_eq!(list.len(), 2);
        let writer = list.iter().find(|t| t.name == "writer").unwrap();
        assert_eq!(writer.description, "LOCAL");
        assert_eq!(writer.layer, TemplateLayer::Local);
    }

    #[test]
    fn missing_builtin_dir_is_not_fatal() {
        let local = TempDir::new().unwrap();
        let pulled = TempDir::new().unwrap();
        let reg = TemplateRegistry::new(
            local.path().to_path_buf(),
            pulled.path().to_path_buf(),
            PathBuf::from("/nonexistent/ago/builtin/dir"),
        );
        write_template(local.path(), "writer", "");
        let list = reg.list(&[TemplateLayer::Local, TemplateLayer::Builtin]).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn bad_template_names_missing_field() {
        let (local, _p, _b, reg) = registry();
        fs::write(local.path().join("broken.yaml"), "description: oops\n").unwrap();
        let err = reg.resolve("broken", &[TemplateLayer::Local]).unwrap_err();
        assert!(matches!(err, AgoError::BadTemplate { .. }));
    }

    #[test]
    fn pull_materialises_into_pulled_layer() {
        let (_l, pulled, _b, reg) = registry();
        let body = "name: fetched\nmodel: gpt-4o-mini\nprompt: hi\n";
        let template = reg.pull("fetched", body).unwrap();
        assert_eq!(template.name, "fetched");
        assert!(pulled.path().join("fetched.yaml").is_file());
    }
}
