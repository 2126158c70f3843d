use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PackError;
use crate::pipeline::PackOptions;

// Optional TOML overlay for the options surface; explicit CLI flags are
// applied on top of it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsFile {
    pub output: Option<PathBuf>,
    pub overwrite: Option<bool>,
    pub dry_run: Option<bool>,
    pub use_shaderlist: Option<bool>,
    pub include_source: Option<bool>,
    pub require_all_assets: Option<bool>,
    pub load_pk3s: Option<bool>,
    #[serde(default)]
    pub exclude_sources: Vec<String>,
    #[serde(default)]
    pub ignore_sources: Vec<String>,
}

impl OptionsFile {
    pub fn load(path: &Path) -> Result<Self, PackError> {
        let text = fs::read_to_string(path).map_err(|err| {
            PackError::environment(format!(
                "options file read failed ({}): {}",
                path.display(),
                err
            ))
        })?;
        Self::parse_toml(&text)
    }

    pub fn parse_toml(text: &str) -> Result<Self, PackError> {
        toml::from_str(text)
            .map_err(|err| PackError::environment(format!("options file parse failed: {}", err)))
    }

    pub fn apply(&self, options: &mut PackOptions) {
        if let Some(output) = &self.output {
            options.output = Some(output.clone());
        }
        if let Some(overwrite) = self.overwrite {
            options.overwrite = overwrite;
        }
        if let Some(dry_run) = self.dry_run {
            options.dry_run = dry_run;
        }
        if let Some(use_shaderlist) = self.use_shaderlist {
            options.use_shaderlist = use_shaderlist;
        }
        if let Some(include_source) = self.include_source {
            options.include_source = include_source;
        }
        if let Some(require_all_assets) = self.require_all_assets {
            options.require_all_assets = require_all_assets;
        }
        if let Some(load_pk3s) = self.load_pk3s {
            options.load_pk3s = load_pk3s;
        }
        for item in &self.exclude_sources {
            if !options.exclude_sources.contains(item) {
                options.exclude_sources.push(item.clone());
            }
        }
        for item in &self.ignore_sources {
            if !options.ignore_sources.contains(item) {
                options.ignore_sources.push(item.clone());
            }
        }
    }
}
