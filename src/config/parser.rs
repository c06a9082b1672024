//! Manifest parser for loading and merging manifest files.
//!
//! This module handles loading manifests from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConvergeError, ManifestError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::manifest::Manifest;

/// Parser for manifest documents.
#[derive(Debug, Default)]
pub struct ManifestParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ManifestParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Manifest(ManifestError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::Manifest(ManifestError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConvergeError::Manifest(ManifestError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed manifest for project: {}",
            manifest.project.name
        );
        Ok(manifest)
    }

    /// Loads a manifest with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `CONVERGE_<SECTION>_<KEY>` (e.g., `CONVERGE_PROJECT_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;

        Self::apply_env_overrides(&mut manifest);

        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("CONVERGE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(env) = std::env::var("CONVERGE_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            manifest.project.environment = env;
        }

        if let Ok(provider) = std::env::var("CONVERGE_DEFAULT_PROVIDER") {
            debug!("Overriding defaults.provider from environment");
            manifest.defaults.provider = provider;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergeError::Manifest(ManifestError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "converge.yaml",
    "converge.yml",
    "manifest.yaml",
    "manifest.yml",
];

/// Finds the manifest file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest file: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConvergeError::Manifest(ManifestError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
project:
  name: test-project
resources: []
";
        let parser = ManifestParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.project.name, "test-project");
        assert_eq!(manifest.project.environment, "dev");
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
project:
  name: web-stack
  environment: prod

defaults:
  provider: memory

resources:
  - type: vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16

  - type: security_group
    name: web
    attributes:
      vpc_id: "${vpc.main.id}"
      ingress:
        - "80/tcp"
        - "443/tcp"

  - type: instance
    name: web
    attributes:
      image_id: img-v1
      instance_type: small
      security_groups:
        - "${security_group.web.id}"
    mutability:
      instance_type: immutable
"#;
        let parser = ManifestParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.project.name, "web-stack");
        assert_eq!(manifest.resources.len(), 3);
        assert_eq!(manifest.resources[2].name, "web");

        let specs = manifest.into_specs().unwrap();
        assert_eq!(specs[1].references.len(), 1);
        assert_eq!(specs[2].references.len(), 1);
    }

    #[test]
    fn test_load_file_not_found() {
        let parser = ManifestParser::new();
        let err = parser.load_file("/nonexistent/converge.yaml").unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::Manifest(ManifestError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_find_manifest_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let manifest_path = dir.path().join("converge.yaml");
        let mut file = std::fs::File::create(&manifest_path).unwrap();
        writeln!(file, "project:\n  name: p\nresources: []").unwrap();

        let found = find_manifest_file(&nested).unwrap();
        assert_eq!(found, manifest_path);
    }
}
