use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The merged document does not fit `ConduitSettings` (e.g. a string
    /// where a port belongs).
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/conduit.json"),
            source,
        };
        assert!(err.to_string().starts_with("/etc/conduit.json is not valid JSON"));
    }
}
