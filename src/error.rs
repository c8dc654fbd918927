//! Error types for descriptor building and configuration loading.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ShapeKind;

/// Errors while building a field descriptor from a declared schema.
///
/// These indicate a bug in the schema definition, not in the data.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unsupported type {type_name} ({kind}) at {}", display_path(path))]
    UnsupportedType {
        kind: ShapeKind,
        type_name: &'static str,
        path: String,
    },

    #[error("conflict key {key} at {}, pay attention to embedded fields", display_path(path))]
    ConflictingKey { key: String, path: String },

    #[error("recursive type {type_name} at {}", display_path(path))]
    RecursiveType {
        type_name: &'static str,
        path: String,
    },
}

/// Errors while loading a configuration document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("unrecognized file type: {path}")]
    UnrecognizedFileType { path: PathBuf },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document root must be a mapping, got {actual}")]
    NotAMapping { actual: &'static str },

    // Schema errors (exit code 2)
    #[error(transparent)]
    Build(#[from] BuildError),

    // Binding errors (exit code 1)
    #[error("cannot bind configuration: {source}")]
    Bind {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            LoadError::Bind { .. } => 1,
            _ => 2,
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("app.yaml"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::UnrecognizedFileType {
            path: PathBuf::from("app.toml"),
        };
        assert_eq!(err.exit_code(), 2);

        let err = LoadError::Build(BuildError::ConflictingKey {
            key: "name".into(),
            path: "name".into(),
        });
        assert_eq!(err.exit_code(), 2);

        let source = serde_json::from_str::<u8>("\"x\"").unwrap_err();
        assert_eq!(LoadError::Bind { source }.exit_code(), 1);
    }

    #[test]
    fn conflict_error_display() {
        let err = BuildError::ConflictingKey {
            key: "host".into(),
            path: "db".into(),
        };
        assert_eq!(
            err.to_string(),
            "conflict key host at db, pay attention to embedded fields"
        );
    }

    #[test]
    fn root_path_display() {
        let err = BuildError::UnsupportedType {
            kind: ShapeKind::Channel,
            type_name: "Sender<u8>",
            path: String::new(),
        };
        assert_eq!(err.to_string(), "unsupported type Sender<u8> (channel) at <root>");
    }
}
