//! Sandbox configuration, consumed once at sandbox construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Modules every sandbox may import, in addition to configured ones.
pub const DEFAULT_MODULES: &[&str] = &["math", "statistics", "datetime", "json", "table"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Comma-separated extra module names scripts may import.
    #[serde(alias = "allowedImportModules")]
    pub allowed_import_modules: String,

    /// Comma-separated directories searched for script modules.
    #[serde(alias = "additionalModulesPaths")]
    pub additional_modules_paths: String,

    /// Maximum nesting of script function calls before `RecursionError`.
    pub max_call_depth: usize,

    /// Stack size of the thread a run executes on.
    pub stack_size_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_import_modules: String::new(),
            additional_modules_paths: String::new(),
            max_call_depth: 100,
            stack_size_bytes: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

impl SandboxConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SCRIPTBOX_ALLOWED_IMPORT_MODULES`: comma-separated module names
    /// - `SCRIPTBOX_ADDITIONAL_MODULES_PATHS`: comma-separated directories
    /// - `SCRIPTBOX_MAX_CALL_DEPTH`: call depth limit
    /// - `SCRIPTBOX_STACK_SIZE_BYTES`: interpreter thread stack size
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SCRIPTBOX_ALLOWED_IMPORT_MODULES") {
            cfg.allowed_import_modules = s;
        }

        if let Ok(s) = std::env::var("SCRIPTBOX_ADDITIONAL_MODULES_PATHS") {
            cfg.additional_modules_paths = s;
        }

        if let Ok(s) = std::env::var("SCRIPTBOX_MAX_CALL_DEPTH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_call_depth = v;
            }
        }

        if let Ok(s) = std::env::var("SCRIPTBOX_STACK_SIZE_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.stack_size_bytes = v;
            }
        }

        cfg
    }

    /// Parse a YAML document; absent keys keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: SandboxConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(Error::Config("max_call_depth must be at least 1".into()));
        }
        if self.stack_size_bytes < 256 * 1024 {
            return Err(Error::Config(format!(
                "stack_size_bytes must be at least 262144, got {}",
                self.stack_size_bytes
            )));
        }
        Ok(())
    }

    /// Default modules followed by configured ones, without duplicates.
    pub fn allowed_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = DEFAULT_MODULES.iter().map(|s| s.to_string()).collect();
        for name in split_list(&self.allowed_import_modules) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn module_paths(&self) -> Vec<PathBuf> {
        split_list(&self.additional_modules_paths)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }
}

/// Split a comma-separated field, trimming entries and dropping empty or
/// repeated ones.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|o| o == item) {
            out.push(item.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_skips_empty() {
        assert_eq!(split_list(" a, b ,,c , a"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn allowed_modules_extends_defaults() {
        let cfg = SandboxConfig {
            allowed_import_modules: "geo, math".into(),
            ..Default::default()
        };
        let names = cfg.allowed_modules();
        assert_eq!(names.len(), DEFAULT_MODULES.len() + 1);
        assert_eq!(names.last().map(String::as_str), Some("geo"));
    }

    #[test]
    fn yaml_accepts_camel_case_aliases() {
        let cfg = SandboxConfig::from_yaml(
            "allowedImportModules: helpers\nadditionalModulesPaths: /opt/a, /opt/b\n",
        )
        .unwrap();
        assert_eq!(cfg.allowed_import_modules, "helpers");
        assert_eq!(cfg.module_paths().len(), 2);
        assert_eq!(cfg.max_call_depth, 100);
    }

    #[test]
    fn yaml_rejects_zero_depth() {
        assert!(SandboxConfig::from_yaml("max_call_depth: 0").is_err());
    }
}
