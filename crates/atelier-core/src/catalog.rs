//! Model catalog - license, attribution and alternate assets per model URL
//!
//! The catalog is a TOML file with one `[[model]]` table per asset. Lookups
//! are keyed by URL with surrounding whitespace, query string and fragment
//! ignored, so signed or cache-busted CDN URLs still resolve.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read model catalog: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse model catalog: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model catalog: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Duplicate catalog entry for {0}")]
    Duplicate(String),
}

/// Credit required by a model's license
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub author: String,
    /// Where the model was obtained
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

impl Attribution {
    /// Single-line credit text
    pub fn text(&self) -> String {
        let mut text = format!("Model by {}", self.author);
        if let Some(source) = &self.source {
            text.push_str(&format!(" ({})", source));
        }
        if let Some(license) = &self.license {
            text.push_str(&format!(", {}", license));
        }
        text
    }
}

/// A single model entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Asset URL (glTF/GLB)
    pub url: String,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// USDZ variant for the iOS viewer path
    #[serde(default)]
    pub ios_src: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
    /// Scale applied when the host does not override it
    #[serde(default)]
    pub default_scale: Option<f32>,
}

impl ModelInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            ios_src: None,
            license: None,
            attribution: None,
            default_scale: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    model: Vec<ModelInfo>,
}

/// URL-indexed model metadata
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelInfo>,
    by_url: HashMap<String, usize>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for model in models {
            catalog.add(model)?;
        }
        Ok(catalog)
    }

    /// Load the catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(file.model)
    }

    pub fn to_toml(&self) -> Result<String, CatalogError> {
        let file = CatalogFile {
            model: self.entries.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    pub fn add(&mut self, model: ModelInfo) -> Result<(), CatalogError> {
        let key = normalize_url(&model.url);
        if self.by_url.contains_key(&key) {
            return Err(CatalogError::Duplicate(model.url));
        }
        self.by_url.insert(key, self.entries.len());
        self.entries.push(model);
        Ok(())
    }

    pub fn lookup(&self, url: &str) -> Option<&ModelInfo> {
        self.by_url
            .get(&normalize_url(url))
            .and_then(|i| self.entries.get(*i))
    }

    /// Catalog name, or the file stem of the URL
    pub fn display_name(&self, url: &str) -> String {
        self.lookup(url)
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| file_stem(url))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelInfo> {
        self.entries.iter()
    }
}

/// Trimmed URL without query string or fragment
///
/// Relative references (plain paths) keep their path unchanged.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => match url.split_once(['?', '#']) {
            Some((path, _)) => path.to_string(),
            None => url.to_string(),
        },
    }
}

/// Last path segment of a URL without its extension, percent-decoded
pub fn file_stem(url: &str) -> String {
    let normalized = normalize_url(url);
    let segment = match Url::parse(&normalized) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)
            .unwrap_or_default(),
        Err(_) => normalized.rsplit('/').next().unwrap_or_default().to_string(),
    };
    let segment = percent_decode_str(&segment).decode_utf8_lossy();
    let stem = match segment.rfind('.') {
        Some(dot) if dot > 0 => &segment[..dot],
        _ => &segment[..],
    };
    if stem.is_empty() {
        "model".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[model]]
url = "https://cdn.example.com/models/lounge-chair.glb"
name = "Lounge Chair"
ios_src = "https://cdn.example.com/models/lounge-chair.usdz"
license = "CC-BY-4.0"
default_scale = 1.0

[model.attribution]
author = "Studio North"
source = "sketchfab.com"
license = "CC-BY-4.0"

[[model]]
url = "https://cdn.example.com/models/side-table.glb"
"#;

    #[test]
    fn test_lookup_ignores_query() {
        let catalog = ModelCatalog::from_toml(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let info = catalog
            .lookup(" https://cdn.example.com/models/lounge-chair.glb?v=3#top ")
            .unwrap();
        assert_eq!(info.name.as_deref(), Some("Lounge Chair"));
        assert_eq!(
            info.attribution.as_ref().unwrap().text(),
            "Model by Studio North (sketchfab.com), CC-BY-4.0"
        );
        assert!(catalog.lookup("https://cdn.example.com/models/sofa.glb").is_none());
    }

    #[test]
    fn test_display_name_fallback() {
        let catalog = ModelCatalog::from_toml(CATALOG).unwrap();
        assert_eq!(catalog.display_name("https://cdn.example.com/models/lounge-chair.glb"), "Lounge Chair");
        assert_eq!(catalog.display_name("https://cdn.example.com/models/side-table.glb"), "side-table");
        assert_eq!(catalog.display_name("https://cdn.example.com/models/"), "model");
        assert_eq!(file_stem("/assets/.hidden"), ".hidden");
        assert_eq!(file_stem("file:///srv/models/lounge%20chair.gltf"), "lounge chair");
        assert_eq!(file_stem("https://cdn.example.com/m/chaise%C3%A9.glb?v=1"), "chaiseé");
    }

    #[test]
    fn test_duplicate_rejected() {
        let toml = r#"
[[model]]
url = "a.glb"

[[model]]
url = "a.glb?cache=1"
"#;
        assert!(matches!(ModelCatalog::from_toml(toml), Err(CatalogError::Duplicate(_))));
    }

    #[test]
    fn test_round_trip() {
        let catalog = ModelCatalog::from_toml(CATALOG).unwrap();
        let again = ModelCatalog::from_toml(&catalog.to_toml().unwrap()).unwrap();
        assert_eq!(again.iter().collect::<Vec<_>>(), catalog.iter().collect::<Vec<_>>());
    }
}
