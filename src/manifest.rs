//! Run manifest
//!
//! The terminal artifact of a completed run: identity, produced files,
//! metadata, provenance, quality results and cost summary. Written exactly
//! once, after run state reports full completion; reloaded verbatim when a
//! completed run is resumed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BookConfig;
use crate::cost::CostSummary;
use crate::error::StorageError;
use crate::quality::QualityReport;
use crate::state::write_json_atomic;

/// Roles the pipeline produces. Every completed run has all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Manuscript,
    CoverImage,
    InteriorPdf,
    CoverPdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub description: String,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub price_usd: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub book_id: String,
    pub title: String,
    pub author: String,

    /// Artifact role to file location, covering every produced artifact.
    pub files: BTreeMap<ArtifactRole, PathBuf>,

    pub metadata: ManifestMetadata,

    /// Content provenance: everything this pipeline produces is
    /// machine-generated, so this is always true.
    pub ai_generated: bool,

    pub quality_check: QualityReport,
    pub cost: CostSummary,
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new(
        config: &BookConfig,
        files: BTreeMap<ArtifactRole, PathBuf>,
        quality_check: QualityReport,
        cost: CostSummary,
    ) -> Self {
        Self {
            book_id: config.id.clone(),
            title: config.title.clone(),
            author: config.author.clone(),
            files,
            metadata: ManifestMetadata {
                description: config.metadata.description.clone(),
                keywords: config.metadata.keywords.clone(),
                categories: config.metadata.categories.clone(),
                price_usd: config.metadata.price.clone(),
                language: config.language.clone(),
            },
            ai_generated: true,
            quality_check,
            cost,
            created_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityChecker;

    #[test]
    fn roundtrips_with_all_roles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let config = BookConfig::from_yaml(
            "id: book-1\ntitle: T\nauthor: A\ntopic: X\n",
        )
        .unwrap();

        let files = BTreeMap::from([
            (ArtifactRole::Manuscript, PathBuf::from("m.md")),
            (ArtifactRole::CoverImage, PathBuf::from("c.png")),
            (ArtifactRole::InteriorPdf, PathBuf::from("i.pdf")),
            (ArtifactRole::CoverPdf, PathBuf::from("c.pdf")),
        ]);
        let quality = QualityChecker::new(1, 1, 1.0).check("## Chapter 1: A\n\nbody text here");

        let manifest = Manifest::new(&config, files, quality, CostSummary::default());
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.book_id, "book-1");
        assert!(loaded.ai_generated);
        assert_eq!(loaded.files.len(), 4);
        assert_eq!(loaded.files[&ArtifactRole::CoverPdf], PathBuf::from("c.pdf"));
        assert_eq!(loaded.metadata.price_usd, "9.99");
    }
}
