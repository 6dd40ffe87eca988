//! Book configuration
//!
//! Defines the serde schema for the book YAML file and the loader that
//! validates it. The config record is immutable once loaded; every later
//! component takes it by reference.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Cover generation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverOptions {
    /// Visual style injected into the image prompt
    #[serde(default = "default_cover_style")]
    pub style: String,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self {
            style: default_cover_style(),
        }
    }
}

fn default_cover_style() -> String {
    "modern minimalist".to_string()
}

/// Publication metadata carried into the manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    /// List price, kept as a string to avoid float drift in the manifest
    #[serde(default = "default_price")]
    pub price: String,
}

fn default_price() -> String {
    "9.99".to_string()
}

/// One publication job. The `id` doubles as the run's storage namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    // Required fields default to empty so that an absent key reports a
    // MissingField error rather than an opaque parse failure.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub topic: String,

    #[serde(default = "default_genre")]
    pub genre: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Text backend tag: ollama | claude | mock
    #[serde(default = "default_llm_backend")]
    pub llm_backend: String,

    /// Image backend tag: stable_diffusion | mock
    #[serde(default = "default_image_backend")]
    pub image_backend: String,

    #[serde(default)]
    pub cover: CoverOptions,

    #[serde(default)]
    pub metadata: BookMetadata,

    /// Optional pre-written outline; generated when empty
    #[serde(default)]
    pub outline: String,
}

fn default_genre() -> String {
    "general".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_llm_backend() -> String {
    "ollama".to_string()
}

fn default_image_backend() -> String {
    "stable_diffusion".to_string()
}

/// YAML files may wrap the config under a top-level `book:` key.
#[derive(Debug, Deserialize)]
struct WrappedConfig {
    book: BookConfig,
}

impl BookConfig {
    /// Parse a config from YAML text, accepting both the wrapped and the
    /// bare layout.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Err(ConfigError::Empty);
        }

        let config = match serde_yaml::from_str::<WrappedConfig>(yaml) {
            Ok(wrapped) => wrapped.book,
            Err(_) => serde_yaml::from_str::<BookConfig>(yaml)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Required-field validation. Runs before the orchestrator is built so a
    /// bad config never creates a run namespace.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("id", &self.id),
            ("title", &self.title),
            ("author", &self.author),
            ("topic", &self.topic),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingField(missing.join(", ")))
        }
    }
}

/// Load and validate a book config from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BookConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    BookConfig::from_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPED: &str = r#"
book:
  id: book-1
  title: Cloud Foundations
  author: J. Writer
  topic: cloud computing for beginners
  genre: technology
  llm_backend: mock
  image_backend: mock
  metadata:
    keywords: [cloud, aws]
"#;

    #[test]
    fn parses_wrapped_layout() {
        let config = BookConfig::from_yaml(WRAPPED).unwrap();
        assert_eq!(config.id, "book-1");
        assert_eq!(config.genre, "technology");
        assert_eq!(config.metadata.keywords, vec!["cloud", "aws"]);
        // defaults
        assert_eq!(config.language, "en");
        assert_eq!(config.cover.style, "modern minimalist");
        assert_eq!(config.metadata.price, "9.99");
    }

    #[test]
    fn parses_bare_layout() {
        let yaml = r#"
id: book-2
title: T
author: A
topic: X
"#;
        let config = BookConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.llm_backend, "ollama");
        assert_eq!(config.image_backend, "stable_diffusion");
    }

    #[test]
    fn missing_required_fields_rejected() {
        let yaml = r#"
id: book-3
title: ""
author: A
topic: X
"#;
        let err = BookConfig::from_yaml(yaml).unwrap_err();
        match err {
            ConfigError::MissingField(fields) => assert_eq!(fields, "title"),
            other => panic!("expected MissingField, got {other}"),
        }
    }

    #[test]
    fn absent_required_key_rejected() {
        let yaml = r#"
book:
  id: book-4
  author: A
  topic: X
"#;
        let err = BookConfig::from_yaml(yaml).unwrap_err();
        match err {
            ConfigError::MissingField(fields) => assert_eq!(fields, "title"),
            other => panic!("expected MissingField, got {other}"),
        }
    }

    #[test]
    fn empty_input_rejected() {
        assert!(matches!(
            BookConfig::from_yaml("  \n"),
            Err(ConfigError::Empty)
        ));
    }
}
