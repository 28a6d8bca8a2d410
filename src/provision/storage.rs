// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Storage directory provisioning.
//!
//! Creates a project's storage directory, then hands it over to the
//! configured owner and group, and applies the configured permission bits.
//!
//! Ownership and permissions are applied as an ordered list of steps, each
//! one aborting the rest on failure. Thus, `chmod` never runs if `chown`
//! failed. Both are re-applied on every run, even if the directory already
//! looks right.

use crate::{
    command::{CommandError, CommandRunner},
    config::StorageSettings,
    provision::{path_arg, ProvisionError, Result},
};

use std::path::Path;
use tracing::{info, instrument};

/// Outcome of preparing a storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOutcome {
    /// Directory did not exist, and was created by this call.
    pub created: bool,
}

/// Create storage directory, and apply ownership and permissions.
///
/// The directory itself is created even in dry-run mode. Only ownership and
/// permission changes are reported instead of applied.
///
/// # Errors
///
/// - Return [`ProvisionError::CreateStorage`] if the directory cannot be
///   created, and still does not exist afterwards.
/// - Return [`ProvisionError::Chown`] if `chown` fails.
/// - Return [`ProvisionError::Chmod`] if `chmod` fails.
#[instrument(skip(runner), level = "debug")]
pub fn prepare_storage_path(
    runner: &impl CommandRunner,
    path: &Path,
    settings: &StorageSettings,
    dry_run: bool,
) -> Result<StorageOutcome> {
    let created = create_dir(path)?;

    if dry_run {
        info!(
            "[dry-run] would set owner={:?} group={:?} mode={:?} on {}",
            settings.owner,
            settings.group,
            settings.mode,
            path.display()
        );
        return Ok(StorageOutcome { created });
    }

    for step in Step::plan(settings) {
        info!("{}", step.describe(path));
        runner
            .run(&step.argv(path), false)
            .map_err(|source| step.clone().into_error(path, source))?;
        info!("{}", step.confirm(path));
    }

    Ok(StorageOutcome { created })
}

fn create_dir(path: &Path) -> Result<bool> {
    if path.exists() {
        info!("storage path {} exists", path.display());
        return Ok(false);
    }

    info!("creating storage path {}", path.display());
    match mkdirp::mkdirp(path) {
        Ok(_) => Ok(true),
        // INVARIANT: Another process may have created it concurrently.
        Err(_) if path.exists() => Ok(false),
        Err(source) => Err(ProvisionError::CreateStorage {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Single ownership or permission change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Chown { target: String },
    Chmod { mode: String },
}

impl Step {
    /// Ordered steps needed to satisfy storage settings.
    fn plan(settings: &StorageSettings) -> Vec<Self> {
        let mut steps = Vec::new();
        if let Some(target) = chown_target(settings.owner.as_deref(), settings.group.as_deref()) {
            steps.push(Self::Chown { target });
        }

        if let Some(mode) = &settings.mode {
            steps.push(Self::Chmod { mode: mode.clone() });
        }

        steps
    }

    fn argv(&self, path: &Path) -> Vec<String> {
        let (program, value) = match self {
            Self::Chown { target } => ("chown", target),
            Self::Chmod { mode } => ("chmod", mode),
        };

        vec![program.into(), "-R".into(), value.clone(), path_arg(path)]
    }

    fn describe(&self, path: &Path) -> String {
        match self {
            Self::Chown { target } => format!("setting ownership {target} on {}", path.display()),
            Self::Chmod { mode } => format!("setting mode {mode} on {}", path.display()),
        }
    }

    fn confirm(&self, path: &Path) -> String {
        match self {
            Self::Chown { target } => format!("ownership {target} set on {}", path.display()),
            Self::Chmod { mode } => format!("mode {mode} set on {}", path.display()),
        }
    }

    fn into_error(self, path: &Path, source: CommandError) -> ProvisionError {
        let path = path.to_path_buf();
        match self {
            Self::Chown { target } => ProvisionError::Chown {
                target,
                path,
                source,
            },
            Self::Chmod { mode } => ProvisionError::Chmod { mode, path, source },
        }
    }
}

/// Ownership argument for `chown`.
///
/// Owner alone, `:group` alone, or `owner:group` for both.
fn chown_target(owner: Option<&str>, group: Option<&str>) -> Option<String> {
    match (owner, group) {
        (Some(owner), Some(group)) => Some(format!("{owner}:{group}")),
        (Some(owner), None) => Some(owner.into()),
        (None, Some(group)) => Some(format!(":{group}")),
        (None, None) => None,
    }
}
