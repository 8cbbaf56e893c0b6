//! `updater.toml`: product identity, executables and update channels.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml_edit::DocumentMut;
use upd_schema::Channel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration document: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}

fn default_product_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Configuration of one installed product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    pub product_name: String,
    #[serde(default = "default_product_version")]
    pub product_version: String,
    /// Main executable, relative to the install dir.
    pub main_executable: PathBuf,
    /// Helper executable, relative to the install dir. Its signature is the
    /// trust anchor for verification.
    pub helper_executable: PathBuf,
    /// File left in place across updates, relative to the install dir.
    pub settings_file: PathBuf,
    /// Name of the selected channel. None disables updating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Scratch root, relative to the install dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl UpdaterConfig {
    pub fn new(
        product_name: impl Into<String>,
        main_executable: impl Into<PathBuf>,
        helper_executable: impl Into<PathBuf>,
        settings_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            product_version: default_product_version(),
            main_executable: main_executable.into(),
            helper_executable: helper_executable.into(),
            settings_file: settings_file.into(),
            channel: None,
            temp_dir: None,
            channels: Vec::new(),
            source: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// File this config was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// `User-Agent` value for update requests.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.product_name, self.product_version)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// The selected channel, if one is named and defined.
    pub fn selected_channel(&self) -> Option<&Channel> {
        let name = self.channel.as_deref()?;
        self.channels.iter().find(|c| c.name == name)
    }

    /// Select `name` and, when loaded from a file, rewrite its `channel` key
    /// in place.
    pub fn set_channel(&mut self, name: &str) -> Result<(), ConfigError> {
        if !self.channels.iter().any(|c| c.name == name) {
            return Err(ConfigError::UnknownChannel(name.to_string()));
        }
        if let Some(path) = &self.source {
            persist_channel(path, name)?;
        }
        self.channel = Some(name.to_string());
        Ok(())
    }
}

/// Set the top-level `channel` key, preserving comments and layout.
fn persist_channel(path: &Path, name: &str) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut doc: DocumentMut = text.parse()?;
    doc["channel"] = toml_edit::value(name);
    std::fs::write(path, doc.to_string()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
