use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::generator::GeneratorConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Inline story script, one scene per line. Takes precedence over `story_file`.
    #[serde(default)]
    pub story: Option<String>,

    #[serde(default)]
    pub story_file: Option<String>,

    #[serde(default)]
    pub characters: Vec<CharacterConfig>,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(skip)]
    pub(crate) path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CharacterConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Path to the reference portrait.
    pub image: Option<String>,
}

fn default_output() -> String {
    "output".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            unattended: false,
            story: None,
            story_file: None,
            characters: Vec::new(),
            generator: GeneratorConfig::default(),
            path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.yml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.yml"));
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    pub fn story_text(&self) -> Result<String> {
        if let Some(story) = &self.story {
            return Ok(story.clone());
        }
        match &self.story_file {
            Some(file) => {
                fs::read_to_string(file).with_context(|| format!("Failed to read story file {}", file))
            }
            None => anyhow::bail!("No story given. Set `story` or `story_file` in the config."),
        }
    }
}
