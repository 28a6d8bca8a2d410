// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host resource provisioning.
//!
//! Brings the external resources a project needs for local development into
//! existence: a Docker network, a host group and user, a storage directory,
//! and a Docker image. None of these are owned by moonenv. The Docker daemon
//! and the operating system own them, moonenv only observes and mutates them
//! for the duration of one operation, and never deletes anything.
//!
//! # Idempotency
//!
//! Every step is an inspect-then-create sequence that can be re-run at will.
//! Existing resources are left alone, there is no drift correction beyond
//! checking for existence.
//!
//! Inspect-then-create is not atomic. Two runs racing on the same resource
//! may both observe it as absent, and both attempt creation. The loser of
//! that race re-inspects after its failed creation, and reports the resource
//! as already existing instead of failing.
//!
//! # Provisioning Sequence
//!
//! [`Provisioner::provision`] runs the full sequence in a fixed order:
//!
//! 1. Docker network.
//! 2. Host group, then host user bound to that group.
//! 3. Storage directory, whose ownership may reference the new user.
//!
//! Each step aborts the sequence on its first failure.

pub mod identity;
pub mod image;
pub mod network;
pub mod storage;

pub use identity::{IdentityOutcome, IdentityRequest};
pub use image::ImageBuild;
pub use network::NetworkOutcome;
pub use storage::StorageOutcome;

use crate::{
    command::{command_line, CommandError, CommandRunner, Result as CommandResult, SystemRunner},
    config::{ConfigError, ProvisioningConfig, StorageSettings},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Provision host resources through a [`CommandRunner`].
///
/// Holds no state of its own beyond the runner, so independent projects can
/// be provisioned concurrently with separate provisioners.
#[derive(Debug, Default)]
pub struct Provisioner<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> Provisioner<R>
where
    R: CommandRunner,
{
    /// Construct new provisioner.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Runner used to spawn external commands.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Ensure Docker network exists.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::CreateNetwork`] if creation fails.
    pub fn ensure_network(&self, name: &str) -> Result<NetworkOutcome> {
        network::ensure_network(&self.runner, name)
    }

    /// Ensure host group and user exist.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::CreateGroup`] or
    ///   [`ProvisionError::CreateUser`] if creation fails.
    pub fn ensure_user_and_group(&self, request: &IdentityRequest<'_>) -> Result<IdentityOutcome> {
        identity::ensure_user_and_group(&self.runner, request)
    }

    /// Create storage directory, and apply ownership and permissions.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::CreateStorage`] if the directory cannot be
    ///   created.
    /// - Return [`ProvisionError::Chown`] or [`ProvisionError::Chmod`] if
    ///   ownership or permissions cannot be applied.
    pub fn prepare_storage_path(
        &self,
        path: &Path,
        settings: &StorageSettings,
        dry_run: bool,
    ) -> Result<StorageOutcome> {
        storage::prepare_storage_path(&self.runner, path, settings, dry_run)
    }

    /// Build Docker image.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Config`] if the build context is missing.
    /// - Return [`ProvisionError::BuildImage`] if the build fails.
    pub fn build_image(&self, build: &ImageBuild<'_>) -> Result<String> {
        image::build_image(&self.runner, build)
    }

    /// Ensure configured Docker network, unless in dry-run mode.
    ///
    /// Returns `None` if the network was only reported.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::CreateNetwork`] if creation fails.
    pub fn network(&self, config: &ProvisioningConfig) -> Result<Option<NetworkOutcome>> {
        if config.env.dry_run {
            info!(
                "[dry-run] would ensure docker network {}",
                config.env.network_name
            );
            return Ok(None);
        }

        self.ensure_network(&config.env.network_name).map(Some)
    }

    /// Ensure Docker network, host group, and host user.
    ///
    /// Honors dry-run for the network as well, which is only ever reported.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError`] of the first step that fails.
    #[instrument(skip(self, config), fields(project = %config.identifier), level = "debug")]
    pub fn host_environment(&self, config: &ProvisioningConfig) -> Result<ProvisionReport> {
        let mut report = ProvisionReport {
            network: self.network(config)?,
            ..Default::default()
        };
        report.identity = Some(self.ensure_user_and_group(&IdentityRequest::from(&config.env))?);

        Ok(report)
    }

    /// Run full provisioning sequence.
    ///
    /// Network, then group and user, then storage.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError`] of the first step that fails.
    #[instrument(skip(self, config), fields(project = %config.identifier), level = "debug")]
    pub fn provision(&self, config: &ProvisioningConfig) -> Result<ProvisionReport> {
        let mut report = self.host_environment(config)?;
        report.storage = Some(self.prepare_storage_path(
            &config.storage_path,
            &config.storage,
            config.env.dry_run,
        )?);

        Ok(report)
    }

    /// Build Docker image of project.
    ///
    /// Ensures the host environment first if the project integrates with the
    /// host lifecycle. In dry-run mode the build command is only reported.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError`] of the first step that fails.
    #[instrument(skip(self, config), fields(project = %config.identifier), level = "debug")]
    pub fn build(&self, config: &ProvisioningConfig) -> Result<ProvisionReport> {
        let mut report = if config.env.integrate_with_host_lifecycle {
            self.host_environment(config)?
        } else {
            ProvisionReport::default()
        };
        report.image = Some(self.build_image(&ImageBuild::from(config))?);

        Ok(report)
    }
}

/// Outcome of each step of a provisioning run.
///
/// Steps that did not run are `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub network: Option<NetworkOutcome>,
    pub identity: Option<IdentityOutcome>,
    pub storage: Option<StorageOutcome>,

    /// Tag of built image.
    pub image: Option<String>,
}

/// Determine if inspection command reports the resource as present.
pub(crate) fn exists(runner: &impl CommandRunner, inspect: &[String]) -> CommandResult<bool> {
    Ok(runner.run(inspect, true)?.success())
}

/// Create resource, tolerating a lost creation race.
///
/// Returns false if creation failed, but the resource exists now anyway.
pub(crate) fn create_or_adopt(
    runner: &impl CommandRunner,
    create: &[String],
    inspect: &[String],
) -> CommandResult<bool> {
    let output = runner.run(create, true)?;
    if output.success() {
        return Ok(true);
    }

    // INVARIANT: Another process may have created it between inspect and create.
    if exists(runner, inspect)? {
        warn!(
            "`{}` failed, but resource exists now, assuming concurrent creation",
            command_line(create)
        );
        return Ok(false);
    }

    Err(output.into_error())
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Invalid or missing configuration discovered before any side effect.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Inspection command could not be run at all.
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to create docker network {name:?}")]
    CreateNetwork {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to create group {name:?}")]
    CreateGroup {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to create user {name:?}")]
    CreateUser {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to create storage path {:?}", path.display())]
    CreateStorage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set ownership {target} on {:?}", path.display())]
    Chown {
        target: String,
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to set mode {mode} on {:?}", path.display())]
    Chmod {
        mode: String,
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to build docker image {image}")]
    BuildImage {
        image: String,
        #[source]
        source: CommandError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
