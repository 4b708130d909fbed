use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CacheError;

/// Lifecycle of one cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Installing,
    Populated,
    Active,
    /// A newer generation activated and deleted this bucket.
    Superseded,
}

/// One versioned snapshot of the offline asset bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
    pub name: String,
    pub asset_list: Vec<String>,
}

impl CacheGeneration {
    pub fn new(name: impl Into<String>, seed: &[String]) -> Self {
        let mut generation = Self {
            name: name.into(),
            asset_list: Vec::new(),
        };
        generation.extend_assets(seed.iter().cloned());
        generation
    }

    /// Append assets not already in the list, keeping order.
    /// Returns how many were added.
    pub fn extend_assets(&mut self, assets: impl IntoIterator<Item = String>) -> usize {
        let mut added = 0;
        for asset in assets {
            let asset = asset.trim().to_string();
            if asset.is_empty() || self.asset_list.contains(&asset) {
                continue;
            }
            self.asset_list.push(asset);
            added += 1;
        }
        added
    }
}

/// Parse the build asset manifest: a JSON array of paths.
pub fn parse_manifest(body: &[u8]) -> Result<Vec<String>, CacheError> {
    serde_json::from_slice(body).map_err(|e| CacheError::Manifest(e.to_string()))
}

fn stylesheet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"href="([^"]*\.css[^"]*)""#).expect("stylesheet pattern is valid")
    })
}

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"src="([^"]*\.js[^"]*)""#).expect("script pattern is valid")
    })
}

/// Stylesheet and script references in an HTML document, in document order
/// (stylesheets first), without duplicates.
pub fn discover_assets(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for pattern in [stylesheet_pattern(), script_pattern()] {
        for capture in pattern.captures_iter(html) {
            let value = capture[1].to_string();
            if !found.contains(&value) {
                found.push(value);
            }
        }
    }
    found
}
