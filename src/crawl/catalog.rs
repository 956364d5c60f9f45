// src/crawl/catalog.rs
// =============================================================================
// Parsing of the catalog bodies the crawl walks through:
//
//   snapshot listing  ->  [{ "hash": ..., "numberOfEntities": ... }, ...]
//   snapshot content  ->  anything containing "entityId":"<id>" markers
//   entity metadata   ->  { "type": "wearable", ... }
//   manifest          ->  { "version": "v24", "files": [...] , ... }
//
// Each record type declares only the fields the crawl reads; unknown
// fields are ignored, so upstream schema additions do not break us.
// =============================================================================

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::EntityBand;
use crate::error::FetchError;

/// Entities of this kind are the ones whose assets we download
pub const TARGET_KIND: &str = "wearable";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    pub hash: String,
    #[serde(rename = "numberOfEntities")]
    pub entity_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub kind: String,
}

#[derive(Deserialize)]
struct EntityRecord {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default)]
    pub files: Vec<String>,
}

pub fn parse_snapshots(body: &str) -> Result<Vec<Snapshot>, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::parse("snapshot listing", e))
}

// First snapshot whose size falls in the band. If none does, the largest one
// (the earliest among equals). None only for an empty listing.
pub fn select_snapshot<'a>(snapshots: &'a [Snapshot], band: &EntityBand) -> Option<&'a Snapshot> {
    snapshots
        .iter()
        .find(|s| band.contains(s.entity_count))
        .or_else(|| {
            snapshots
                .iter()
                .reduce(|best, s| if s.entity_count > best.entity_count { s } else { best })
        })
}

fn entity_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""entityId"\s*:\s*"([^"]*)""#).expect("entity id pattern is valid"))
}

// Entity ids in the order they appear. Duplicates are kept.
pub fn extract_entity_ids(body: &str) -> Vec<String> {
    entity_id_pattern()
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect()
}

pub fn parse_entity(id: &str, body: &str) -> Result<Entity, FetchError> {
    let record: EntityRecord =
        serde_json::from_str(body).map_err(|e| FetchError::parse("entity metadata", e))?;
    Ok(Entity {
        id: id.to_string(),
        kind: record.kind,
    })
}

pub fn parse_manifest(body: &str) -> Result<Manifest, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::parse("manifest", e))
}

impl Manifest {
    /// Numeric part of the version tag: "v24" -> 24
    pub fn version_number(&self) -> Result<u32, FetchError> {
        let mut chars = self.version.chars();
        chars.next();
        chars
            .as_str()
            .parse()
            .map_err(|_| FetchError::parse("manifest version", &self.version))
    }

    /// Files built for the given platform
    pub fn platform_files<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.files
            .iter()
            .map(String::as_str)
            .filter(move |file| file.ends_with(suffix))
    }
}
