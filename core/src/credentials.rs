//! Admin credentials for the commissioning wizard.

use std::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::config::{ENV_ADMIN_PASSWORD, ENV_ADMIN_PASSWORD_FILE, ENV_RANDOM_ADMIN_PASSWORD, PasswordSource};
use crate::error::{GwinitError, Result};

const RANDOM_PASSWORD_LEN: usize = 16;

/// Resolved admin password. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminPassword(String);

impl AdminPassword {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AdminPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminPassword(<redacted>)")
    }
}

fn random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

pub fn resolve_password(source: &PasswordSource) -> Result<AdminPassword> {
    match source {
        PasswordSource::Value(value) => Ok(AdminPassword::new(value.clone())),
        PasswordSource::File(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| GwinitError::io(path, e))?;
            let value = raw.trim_end_matches(['\r', '\n']);
            if value.is_empty() {
                return Err(GwinitError::config(format!(
                    "{ENV_ADMIN_PASSWORD_FILE} points at an empty file ({})",
                    path.display()
                )));
            }
            Ok(AdminPassword::new(value))
        }
        PasswordSource::Random => {
            let value = random_password();
            tracing::warn!(password = %value, "Generated random admin password");
            Ok(AdminPassword::new(value))
        }
        PasswordSource::Unset => Err(GwinitError::config(format!(
            "a fresh install needs {ENV_ADMIN_PASSWORD}, {ENV_ADMIN_PASSWORD_FILE} or \
             {ENV_RANDOM_ADMIN_PASSWORD}=true"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use tempfile::TempDir;

    #[test]
    fn file_source_strips_trailing_newline_only() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pw");
        std::fs::write(&path, " s3cret \n").unwrap();
        let password = resolve_password(&PasswordSource::File(path)).unwrap();
        assert_eq!(password.expose(), " s3cret ");
    }

    #[test]
    fn empty_or_missing_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty");
        std::fs::write(&empty, "\n").unwrap();
        let err = resolve_password(&PasswordSource::File(empty)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = resolve_password(&PasswordSource::File(tmp.path().join("nope"))).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    #[test]
    fn random_password_is_sixteen_alphanumerics() {
        let password = resolve_password(&PasswordSource::Random).unwrap();
        assert_eq!(password.expose().len(), 16);
        assert!(password.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn unset_source_is_a_configuration_error() {
        let err = resolve_password(&PasswordSource::Unset).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn debug_does_not_leak() {
        assert!(!format!("{:?}", AdminPassword::new("hunter2")).contains("hunter2"));
    }
}
