//! Project configuration loading for the quota exporter.
//!
//! The config file is a YAML sequence of project entries. Loading is split in
//! two phases: parsing, which is fatal on failure, and per-entry validation,
//! which drops bad entries and counts them as configuration errors.

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, instrument};

pub mod entry;
pub use entry::EntryError;

/// Error count reported before any entry is inspected.
///
/// The gauge reads 1 on a clean config; every rejected entry adds to it.
pub const INITIAL_ERROR_COUNT: u64 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Couldn't read config {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Couldn't parse config {path}: {message}")]
    ParseError { path: String, message: String },
}

/// One monitored project as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, alias = "Project", deserialize_with = "null_as_default")]
    pub project: String,

    /// Region allowlist; empty means every region of the project.
    #[serde(default, alias = "Regions", deserialize_with = "null_as_default")]
    pub regions: Vec<String>,

    /// Path to the service-account key used for this project.
    #[serde(default, alias = "Credentials", deserialize_with = "null_as_default")]
    pub credentials: String,
}

impl ProjectConfig {
    pub fn new(
        project: impl Into<String>,
        regions: Vec<String>,
        credentials: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            regions,
            credentials: credentials.into(),
        }
    }

    pub fn monitors_all_regions(&self) -> bool {
        self.regions.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome of validating a config file.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// Accepted entries, in file order.
    pub projects: Vec<ProjectConfig>,
    /// Rejected entries, in file order.
    pub rejected: Vec<EntryError>,
    error_count: u64,
}

impl ConfigLoad {
    /// Value for the `gcp_quota_config_err` gauge.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }
}

pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read, parse and validate the config file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<ConfigLoad, ConfigError> {
        let display = self.path.to_string_lossy().to_string();

        let content = fs::read_to_string(&self.path).map_err(|e| ConfigError::IoError {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let entries = parse_projects(&content).map_err(|e| ConfigError::ParseError {
            path: display,
            message: e.to_string(),
        })?;

        debug!("Parsed {} project entries", entries.len());
        Ok(validate_projects(entries))
    }
}

/// Parse the YAML project list. An empty document holds no entries.
pub fn parse_projects(content: &str) -> Result<Vec<ProjectConfig>, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Option<Vec<ProjectConfig>> = serde_yaml::from_str(content)?;
    Ok(entries.unwrap_or_default())
}

/// Validate entries in order, keeping the first entry for each project id.
pub fn validate_projects(entries: Vec<ProjectConfig>) -> ConfigLoad {
    let mut accepted_ids: HashSet<String> = HashSet::new();
    let mut projects = Vec::new();
    let mut rejected = Vec::new();
    let mut error_count = INITIAL_ERROR_COUNT;

    for entry in entries {
        match check_entry(&entry, &accepted_ids) {
            Ok(()) => {
                debug!(
                    project = %entry.project,
                    regions = ?entry.regions,
                    "Accepted project entry"
                );
                accepted_ids.insert(entry.project.clone());
                projects.push(entry);
            }
            Err(rejection) => {
                if rejection == EntryError::MissingProject {
                    debug!("{}", rejection);
                } else {
                    error!("{}", rejection);
                }
                if rejection.counts_as_error() {
                    error_count += 1;
                }
                rejected.push(rejection);
            }
        }
    }

    ConfigLoad {
        projects,
        rejected,
        error_count,
    }
}

fn check_entry(entry: &ProjectConfig, accepted_ids: &HashSet<String>) -> Result<(), EntryError> {
    if entry.project.is_empty() {
        return Err(EntryError::MissingProject);
    }

    if entry.credentials.is_empty() {
        return Err(EntryError::MissingCredentials {
            project: entry.project.clone(),
        });
    }

    if fs::metadata(&entry.credentials).is_err() {
        return Err(EntryError::CredentialsNotFound {
            project: entry.project.clone(),
            path: entry.credentials.clone(),
        });
    }

    if accepted_ids.contains(&entry.project) {
        return Err(EntryError::DuplicateProject {
            project: entry.project.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn credentials_in(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, "{}").unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_parse_lowercase_keys() {
        let yaml = r#"
- project: alpha
  regions: [europe-west1, us-east1]
  credentials: /tmp/alpha.json
"#;
        let entries = parse_projects(yaml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].project, "alpha");
        assert_eq!(entries[0].regions, vec!["europe-west1", "us-east1"]);
        assert_eq!(entries[0].credentials, "/tmp/alpha.json");
    }

    #[test]
    fn test_parse_capitalised_keys_and_nulls() {
        let yaml = r#"
- Project: beta
  Regions:
  Credentials: /tmp/beta.json
- project:
"#;
        let entries = parse_projects(yaml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].project, "beta");
        assert!(entries[0].monitors_all_regions());
        assert_eq!(entries[1], ProjectConfig::default());
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(parse_projects("").unwrap().is_empty());
        assert!(parse_projects("~\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_mapping() {
        assert!(parse_projects("project: alpha\n").is_err());
    }

    #[test]
    fn test_clean_config_reports_sentinel() {
        let dir = TempDir::new().unwrap();
        let creds = credentials_in(&dir, "alpha.json");

        let load = validate_projects(vec![ProjectConfig::new("alpha", vec![], creds)]);

        assert_eq!(load.projects.len(), 1);
        assert!(load.rejected.is_empty());
        assert_eq!(load.error_count(), INITIAL_ERROR_COUNT);
    }

    #[test]
    fn test_missing_credentials_file_is_not_counted() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json").to_string_lossy().to_string();

        let load = validate_projects(vec![ProjectConfig::new("alpha", vec![], missing)]);

        assert!(load.projects.is_empty());
        assert_eq!(load.error_count(), INITIAL_ERROR_COUNT);
        assert!(matches!(
            load.rejected[0],
            EntryError::CredentialsNotFound { .. }
        ));
    }

    #[test]
    fn test_duplicate_checked_against_accepted_only() {
        let dir = TempDir::new().unwrap();
        let creds = credentials_in(&dir, "alpha.json");
        let missing = dir.path().join("missing.json").to_string_lossy().to_string();

        // The first entry never gets accepted, so the second is not a duplicate.
        let load = validate_projects(vec![
            ProjectConfig::new("alpha", vec![], missing),
            ProjectConfig::new("alpha", vec![], creds.clone()),
            ProjectConfig::new("alpha", vec![], creds),
        ]);

        assert_eq!(load.projects.len(), 1);
        assert_eq!(load.error_count(), INITIAL_ERROR_COUNT + 1);
        assert!(matches!(
            load.rejected[1],
            EntryError::DuplicateProject { .. }
        ));
    }

    #[test]
    fn test_missing_project_is_dropped_without_error_log() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let load = tracing::subscriber::with_default(subscriber, || {
            validate_projects(vec![
                ProjectConfig::default(),
                ProjectConfig::new("alpha", vec![], ""),
            ])
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(load.error_count(), INITIAL_ERROR_COUNT + 2);
        assert!(!output.contains("Project id not specified"));
        assert!(output.contains("Credential not specified for alpha"));
    }

    #[test]
    fn test_duplicate_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let creds = credentials_in(&dir, "alpha.json");

        let load = validate_projects(vec![
            ProjectConfig::new("alpha", vec![], creds.clone()),
            ProjectConfig::new("Alpha", vec![], creds),
        ]);

        assert_eq!(load.projects.len(), 2);
        assert_eq!(load.error_count(), INITIAL_ERROR_COUNT);
    }
}
