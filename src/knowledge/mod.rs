// Knowledge base loading
// Reads `<root>/<category>/**/*.<ext>` into category-tagged documents


use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// A source document read from the knowledge base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the file the document was read from
    pub source: PathBuf,
    /// Name of the category directory directly under the knowledge base root
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DocumentLoader {
    #[inline]
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.knowledge_base_path(),
            config.paths.extensions.clone(),
        )
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every matching document under each category directory.
    ///
    /// Categories without matching files contribute nothing. A missing root
    /// yields an empty result. Any unreadable file fails the whole load.
    #[inline]
    pub fn load(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            warn!(
                "Knowledge base directory {} does not exist, nothing to load",
                self.root.display()
            );
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();

        for (category, folder) in self.categories()? {
            let before = documents.len();
            self.load_category(&category, &folder, &mut documents)?;
            debug!(
                "Loaded {} documents from category '{}'",
                documents.len() - before,
                category
            );
        }

        info!(
            "Loaded {} documents from {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents)
    }

    /// Immediate subdirectories of the root, sorted by name
    fn categories(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = fs::read_dir(&self.root).with_context(|| {
            format!(
                "Failed to read knowledge base directory: {}",
                self.root.display()
            )
        })?;

        let mut categories = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read knowledge base entry")?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let category = entry.file_name().to_string_lossy().into_owned();
            categories.push((category, path));
        }

        categories.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Ok(categories)
    }

    fn load_category(
        &self,
        category: &str,
        folder: &Path,
        documents: &mut Vec<Document>,
    ) -> Result<()> {
        for entry in WalkDir::new(folder).follow_links(true).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk category folder: {}", folder.display()))?;
            let path = entry.path();

            if !entry.file_type().is_file() || !self.matches_extension(path) {
                continue;
            }

            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read document: {}", path.display()))?;

            documents.push(Document {
                content,
                metadata: DocumentMetadata {
                    source: path.to_path_buf(),
                    category: category.to_string(),
                },
            });
        }

        Ok(())
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}
