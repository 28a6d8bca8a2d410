// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevant path information for the project being provisioned, and
//! for the external directories that need to be created or handed over to a
//! host user.

use std::{
    env::{current_dir, VarError},
    path::{Path, PathBuf},
};

/// Name of the project-local configuration file.
pub const PROJECT_FILE_NAME: &str = "moon.toml";

/// Perform shell expansion on configuration value.
///
/// Expands leading tilde and `$VAR` or `${VAR}` references.
///
/// # Errors
///
/// - Return [`PathError::Expand`] if a referenced variable is not set.
pub fn expand(value: impl AsRef<str>) -> Result<String> {
    Ok(shellexpand::full(value.as_ref())?.into_owned())
}

/// Anchor relative path to a base directory.
///
/// Absolute paths are returned unchanged.
pub fn absolutize(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }

    base.as_ref().join(path)
}

/// Determine absolute project directory.
///
/// Falls back to the current working directory if no directory was given.
///
/// # Errors
///
/// - Return [`PathError::CurrentDir`] if the current working directory
///   cannot be determined.
pub fn project_dir(path: Option<&Path>) -> Result<PathBuf> {
    let cwd = current_dir().map_err(PathError::CurrentDir)?;
    Ok(match path {
        Some(path) => absolutize(cwd, path),
        None => cwd,
    })
}

/// Derive project identifier from the name of its directory.
///
/// # Errors
///
/// - Return [`PathError::NoIdentifier`] if the path has no final component,
///   e.g., `/`.
pub fn project_identifier(project_dir: impl AsRef<Path>) -> Result<String> {
    project_dir
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PathError::NoIdentifier {
            path: project_dir.as_ref().to_path_buf(),
        })
}

/// Default storage directory of a project.
///
/// Uses `/var/lib/<identifier>`. Does not check if the path returned actually
/// exists.
pub fn default_storage_path(identifier: impl AsRef<str>) -> PathBuf {
    Path::new("/var/lib").join(identifier.as_ref())
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Shell expansion referenced an unset variable.
    #[error(transparent)]
    Expand(#[from] shellexpand::LookupError<VarError>),

    /// Current working directory is unavailable.
    #[error("cannot determine current working directory")]
    CurrentDir(#[source] std::io::Error),

    /// Project directory has no name to derive an identifier from.
    #[error("cannot derive project identifier from {:?}", path.display())]
    NoIdentifier { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("MOON_DATA", "/srv/moon")])]
    fn expand_environment_variables() -> anyhow::Result<()> {
        assert_eq!(expand("$MOON_DATA/redis")?, "/srv/moon/redis");
        assert_eq!(expand("${MOON_DATA}")?, "/srv/moon");
        Ok(())
    }

    #[sealed_test]
    fn expand_fails_on_unset_variable() {
        std::env::remove_var("MOON_UNSET_VARIABLE");
        assert!(matches!(
            expand("$MOON_UNSET_VARIABLE/x"),
            Err(PathError::Expand(_))
        ));
    }

    #[test]
    fn absolutize_keeps_absolute_paths() {
        assert_eq!(absolutize("/base", "/etc/redis"), PathBuf::from("/etc/redis"));
        assert_eq!(absolutize("/base", "data"), PathBuf::from("/base/data"));
    }

    #[test]
    fn project_identifier_from_directory_name() -> anyhow::Result<()> {
        assert_eq!(project_identifier("/work/redis")?, "redis");
        assert!(project_identifier("/").is_err());
        Ok(())
    }

    #[test]
    fn default_storage_path_under_var_lib() {
        assert_eq!(default_storage_path("fantti"), PathBuf::from("/var/lib/fantti"));
    }
}
