//! Storage directory validation

use std::path::Path;

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate that the storage directory exists or can be created
pub fn validate_storage(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let storage = &config.acme.storage;

    if storage.exists() {
        if !storage.is_dir() {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("Storage path is not a directory: {}", storage.display()),
            ));
        }
        return result;
    }

    // Created on startup; the nearest existing ancestor must be a directory.
    match storage.ancestors().skip(1).find(|p| p.exists()) {
        Some(ancestor) if ancestor.is_dir() => {
            result.add_warning(ValidationWarning::new(format!(
                "Storage directory {} does not exist yet and will be created",
                storage.display()
            )));
        }
        Some(ancestor) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!(
                    "Storage directory {} cannot be created: {} is not a directory",
                    storage.display(),
                    ancestor.display()
                ),
            ));
        }
        None if storage.is_relative() || storage == Path::new("") => {
            result.add_warning(ValidationWarning::new(format!(
                "Storage directory {} is relative to the working directory",
                storage.display()
            )));
        }
        None => {}
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.acme.storage = dir.path().to_path_buf();

        let result = validate_storage(&config);
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_directory_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.acme.storage = dir.path().join("acme");

        let result = validate_storage(&config);
        assert!(result.is_ok());
        assert!(result.warnings[0].message.contains("will be created"));
    }

    #[test]
    fn test_file_in_the_way_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let mut config = Config::default();
        config.acme.storage = file.join("acme");

        let result = validate_storage(&config);
        assert_eq!(result.errors[0].category, ErrorCategory::Storage);
    }
}
