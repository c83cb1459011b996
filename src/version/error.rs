use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("failed converting {version:?} to a semantic version")]
    InvalidCandidate { version: String },

    #[error(
        "failed converting the stored version {version:?} to a semantic version. \
         If you have just enabled semantic versioning for this service, \
         clear its stored versions or disable semantic_versioning"
    )]
    InvalidStored { version: String },
}
