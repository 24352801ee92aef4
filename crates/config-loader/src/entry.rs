use thiserror::Error;

/// Why a single project entry was dropped from monitoring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("Project id not specified")]
    MissingProject,

    #[error("Credential not specified for {project}")]
    MissingCredentials { project: String },

    #[error("Credential file [{path}] not found for {project}")]
    CredentialsNotFound { project: String, path: String },

    #[error("Duplicate project [{project}] in config")]
    DuplicateProject { project: String },
}

impl EntryError {
    /// Whether the rejection adds to the config error gauge.
    ///
    /// A credentials path that does not exist on disk is only logged.
    pub fn counts_as_error(&self) -> bool {
        !matches!(self, EntryError::CredentialsNotFound { .. })
    }
}
