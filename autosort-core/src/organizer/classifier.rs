//! Extension-based file classification

use crate::config::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A destination category and the directory its files are moved into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub directory: PathBuf,
}

/// Maps normalized extensions (`.mp3`) to destination categories
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: Vec<Category>,
    extensions: HashMap<String, usize>,
}

impl Classifier {
    /// Build a classifier from categories and their raw extension lists.
    ///
    /// Every extension must map to exactly one category.
    pub fn from_categories(
        entries: Vec<(Category, Vec<String>)>,
    ) -> Result<Self, ConfigError> {
        let mut categories = Vec::with_capacity(entries.len());
        let mut extensions: HashMap<String, usize> = HashMap::new();

        for (index, (category, raw_extensions)) in entries.into_iter().enumerate() {
            for raw in &raw_extensions {
                let extension = normalize_extension(raw).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "category `{}` has an empty extension",
                        category.name
                    ))
                })?;

                if let Some(&existing) = extensions.get(&extension) {
                    // Repeating an extension inside one category is harmless
                    if existing != index {
                        let first: &Category = &categories[existing];
                        return Err(ConfigError::DuplicateExtension {
                            extension,
                            first: first.name.clone(),
                            second: category.name.clone(),
                        });
                    }
                    continue;
                }
                extensions.insert(extension, index);
            }
            categories.push(category);
        }

        Ok(Self { categories, extensions })
    }

    /// Classify a file by its extension, case-insensitively.
    /// `None` means the file is unmanaged and must be left in place.
    pub fn classify(&self, path: &Path) -> Option<&Category> {
        let extension = extension_key(path)?;
        self.extensions.get(&extension).map(|&index| &self.categories[index])
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Number of extensions in the table
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// Lower-case an extension and give it a leading dot
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

/// Normalized extension of `path`, if it has one
pub fn extension_key(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).and_then(normalize_extension)
}
