use std::path::PathBuf;

/// Why settings could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid settings JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The merged settings contradict themselves (duplicate section ids,
    /// inverted delay bounds, ...).
    #[error("invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/loom.json"),
            source,
        };
        assert!(err.to_string().starts_with("/etc/loom.json is not valid settings JSON"));

        let err = SettingsError::Read {
            path: PathBuf::from("/root/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /root/settings.json: denied");
    }
}
