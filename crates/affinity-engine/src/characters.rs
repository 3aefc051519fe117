//! Character catalog loaded from a JSON file keyed by character id.
//!
//! ```json
//! { "ada": { "name": "Ada", "description": "A poet.", "avatar": "/avatars/ada.png" } }
//! ```
//!
//! Fields other than `name` and `description` are kept and served as-is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct CharacterCatalog {
    characters: BTreeMap<String, CharacterConfig>,
}

impl CharacterCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        let characters: BTreeMap<String, CharacterConfig> =
            serde_json::from_str(json).context("Invalid character catalog")?;
        Ok(Self { characters })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read character catalog {}", path.display()))?;
        let catalog = Self::from_json(&json)?;
        info!("Loaded {} characters from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn get(&self, character_id: &str) -> Option<&CharacterConfig> {
        self.characters.get(character_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CharacterConfig)> {
        self.characters.iter().map(|(id, config)| (id.as_str(), config))
    }

    /// Persona for a character. A catalog entry wins over the caller's values.
    pub fn persona(
        &self,
        character_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> (Option<String>, Option<String>) {
        match self.get(character_id) {
            Some(config) => (Some(config.name.clone()), Some(config.description.clone())),
            None => (name, description),
        }
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}
