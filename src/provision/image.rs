// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Docker image building.
//!
//! Builds `name:version` from a build context, passing the UID and GID the
//! image should run as through `--build-arg UID=<uid> --build-arg GID=<gid>`.
//! Explicit values win. Otherwise, the UID and GID of the current process are
//! detected through `id -u` and `id -g`. If detection fails, both build
//! arguments are left out entirely rather than passing garbage, letting the
//! Dockerfile fall back to its own defaults.
//!
//! In dry-run mode the `docker build` command line is logged, not run.

use crate::{
    command::{argv, command_line, CommandRunner},
    config::{ConfigError, ProvisioningConfig},
    provision::{path_arg, ProvisionError, Result},
};

use std::path::Path;
use tracing::{info, instrument, warn};

/// Docker image to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild<'a> {
    pub name: &'a str,
    pub version: &'a str,

    /// Dockerfile, only passed to `docker build` if it exists.
    pub dockerfile: &'a Path,

    /// Build context, must exist.
    pub context: &'a Path,

    /// Explicit UID, detected if absent or blank.
    pub uid: Option<&'a str>,

    /// Explicit GID, detected if absent or blank.
    pub gid: Option<&'a str>,

    /// Only report the build command instead of running it.
    pub dry_run: bool,
}

impl ImageBuild<'_> {
    /// Image tag in `name:version` form.
    pub fn tag(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

impl<'a> From<&'a ProvisioningConfig> for ImageBuild<'a> {
    fn from(config: &'a ProvisioningConfig) -> Self {
        Self {
            name: &config.image_name,
            version: &config.image_version,
            dockerfile: &config.dockerfile,
            context: &config.context_dir,
            uid: config.uid.as_deref(),
            gid: config.gid.as_deref(),
            dry_run: config.env.dry_run,
        }
    }
}

/// Build Docker image, returning its tag.
///
/// # Errors
///
/// - Return [`ProvisionError::Config`] if the build context does not exist.
///   No external command is run in that case, not even in dry-run mode.
/// - Return [`ProvisionError::BuildImage`] if `docker build` fails.
#[instrument(skip(runner), level = "debug")]
pub fn build_image(runner: &impl CommandRunner, build: &ImageBuild<'_>) -> Result<String> {
    let tag = build.tag();
    info!(
        "building docker image {tag} (dockerfile={}, context={})",
        build.dockerfile.display(),
        build.context.display()
    );

    if !build.context.exists() {
        return Err(ConfigError::MissingBuildContext {
            path: build.context.to_path_buf(),
        }
        .into());
    }

    let mut command = argv(["docker", "build", "-t", tag.as_str()]);
    if build.dockerfile.exists() {
        command.extend(["-f".into(), path_arg(build.dockerfile)]);
    }

    let uid = resolve_id(runner, build.uid, "-u");
    let gid = resolve_id(runner, build.gid, "-g");
    match (uid, gid) {
        (Some(uid), Some(gid)) => command.extend([
            "--build-arg".into(),
            format!("UID={uid}"),
            "--build-arg".into(),
            format!("GID={gid}"),
        ]),
        _ => warn!("building {tag} without UID and GID build arguments"),
    }
    command.push(path_arg(build.context));

    if build.dry_run {
        info!("[dry-run] would run {}", command_line(&command));
        return Ok(tag);
    }

    runner
        .run(&command, false)
        .map_err(|source| ProvisionError::BuildImage {
            image: tag.clone(),
            source,
        })?;
    info!("docker image {tag} built");

    Ok(tag)
}

/// Explicit ID, or ID of current process through `id <flag>`.
fn resolve_id(runner: &impl CommandRunner, explicit: Option<&str>, flag: &str) -> Option<String> {
    if let Some(value) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Some(value.into());
    }

    match runner.run(&argv(["id", flag]), false) {
        Ok(output) => {
            let id = output.stdout().trim();
            if id.parse::<u32>().is_ok() {
                Some(id.into())
            } else {
                warn!("`id {flag}` returned non-numeric {id:?}");
                None
            }
        }
        Err(err) => {
            warn!("cannot detect id through `id {flag}`: {err}");
            None
        }
    }
}
