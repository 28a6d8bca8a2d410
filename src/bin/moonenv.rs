// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use moonenv::{
    config::Property,
    path::{project_dir, project_identifier},
    CommandRunner, EnvSettings, ProjectFile, Properties, ProvisionReport, Provisioner,
    ProvisioningConfig, StorageSettings, SystemRunner,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "moonenv [options] <moonenv-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub project: ProjectOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run<R>(self, provisioner: &Provisioner<R>) -> Result<()>
    where
        R: CommandRunner,
    {
        match self.command {
            Command::Check => run_check(self.project),
            Command::Network(opts) => run_network(provisioner, self.project, opts),
            Command::Identity(opts) => run_identity(provisioner, self.project, opts),
            Command::Storage(opts) => run_storage(provisioner, self.project, opts),
            Command::Build(opts) => run_build(provisioner, self.project, opts),
            Command::Provision(opts) => run_provision(provisioner, self.project, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show resolved project properties without touching the host.
    #[command(override_usage = "moonenv check [options]")]
    Check,

    /// Ensure docker network exists.
    #[command(override_usage = "moonenv network [options]")]
    Network(EnvOptions),

    /// Ensure host group and user exist.
    #[command(override_usage = "moonenv identity [options]")]
    Identity(EnvOptions),

    /// Create storage path, and apply ownership and permissions.
    #[command(override_usage = "moonenv storage [options]")]
    Storage(StorageCommandOptions),

    /// Build docker image of project.
    #[command(override_usage = "moonenv build [options]")]
    Build(EnvOptions),

    /// Ensure network, group, user, and storage path in that order.
    #[command(override_usage = "moonenv provision [options]")]
    Provision(ProvisionOptions),
}

#[derive(Args, Clone, Debug)]
struct ProjectOptions {
    /// Project directory containing moon.toml.
    #[arg(short = 'C', long, global = true, value_name = "path")]
    pub project_dir: Option<PathBuf>,

    /// Project identifier, defaults to name of project directory.
    #[arg(short, long, global = true, value_name = "identifier")]
    pub name: Option<String>,

    /// Explicit property override, e.g., redis.port=6380.
    #[arg(short = 'P', long = "property", global = true, value_name = "key=value")]
    pub properties: Vec<Property>,
}

impl ProjectOptions {
    fn resolve(
        self,
        env: Option<&EnvOptions>,
        storage: Option<&StorageOptions>,
    ) -> Result<ProvisioningConfig> {
        let project_dir = project_dir(self.project_dir.as_deref())?;
        let identifier = match self.name {
            Some(name) => name,
            None => project_identifier(&project_dir)?,
        };

        let mut file = ProjectFile::load(&project_dir)?;
        if let Some(env) = env {
            env.apply(&mut file.env);
        }
        if let Some(storage) = storage {
            storage.apply(&mut file.storage);
        }

        let properties = self.properties.into_iter().collect::<Properties>();
        Ok(ProvisioningConfig::resolve(
            identifier,
            &project_dir,
            &properties,
            &file,
            None,
        )?)
    }
}

#[derive(Args, Clone, Debug)]
struct EnvOptions {
    /// Docker network to ensure.
    #[arg(long, env = "MOONENV_NETWORK", value_name = "name")]
    pub network: Option<String>,

    /// Host user to ensure.
    #[arg(long, env = "MOONENV_HOST_USER", value_name = "name")]
    pub host_user: Option<String>,

    /// Host group to ensure.
    #[arg(long, env = "MOONENV_HOST_GROUP", value_name = "name")]
    pub host_group: Option<String>,

    /// Explicit UID of host user.
    #[arg(long, env = "MOONENV_HOST_UID", value_name = "uid")]
    pub host_uid: Option<String>,

    /// Explicit GID of host group.
    #[arg(long, env = "MOONENV_HOST_GID", value_name = "gid")]
    pub host_gid: Option<String>,

    /// Report intended actions without performing them.
    #[arg(long, env = "MOONENV_DRY_RUN")]
    pub dry_run: bool,

    /// Skip host user and group creation when not running as root.
    #[arg(long, env = "MOONENV_SKIP_IF_NO_PRIVILEGES")]
    pub skip_if_no_privileges: bool,

    /// Ensure network, group, and user before building images.
    #[arg(long, env = "MOONENV_INTEGRATE_WITH_HOST_LIFECYCLE")]
    pub integrate_with_host_lifecycle: bool,
}

impl EnvOptions {
    fn apply(&self, env: &mut EnvSettings) {
        if let Some(network) = &self.network {
            env.network_name = network.clone();
        }
        if let Some(user) = &self.host_user {
            env.user_name = user.clone();
        }
        if let Some(group) = &self.host_group {
            env.group_name = group.clone();
        }
        if self.host_uid.is_some() {
            env.uid = self.host_uid.clone();
        }
        if self.host_gid.is_some() {
            env.gid = self.host_gid.clone();
        }
        env.dry_run |= self.dry_run;
        env.skip_if_no_privileges |= self.skip_if_no_privileges;
        env.integrate_with_host_lifecycle |= self.integrate_with_host_lifecycle;
    }
}

#[derive(Args, Clone, Debug)]
struct StorageOptions {
    /// Owner to hand storage path over to.
    #[arg(long, value_name = "user")]
    pub owner: Option<String>,

    /// Group to hand storage path over to.
    #[arg(long, value_name = "group")]
    pub group: Option<String>,

    /// Permission bits to apply, in chmod syntax.
    #[arg(long, value_name = "mode")]
    pub mode: Option<String>,
}

impl StorageOptions {
    fn apply(&self, storage: &mut StorageSettings) {
        if self.owner.is_some() {
            storage.owner = self.owner.clone();
        }
        if self.group.is_some() {
            storage.group = self.group.clone();
        }
        if self.mode.is_some() {
            storage.mode = self.mode.clone();
        }
    }
}

#[derive(Args, Clone, Debug)]
struct StorageCommandOptions {
    #[command(flatten)]
    pub storage: StorageOptions,

    /// Create storage path, but only report ownership and mode changes.
    #[arg(long, env = "MOONENV_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
struct ProvisionOptions {
    #[command(flatten)]
    pub env: EnvOptions,

    #[command(flatten)]
    pub storage: StorageOptions,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run(&Provisioner::new(SystemRunner::new()))
}

fn run_check(project: ProjectOptions) -> Result<()> {
    let config = project.resolve(None, None)?;
    print!("{config}");

    Ok(())
}

fn run_network(
    provisioner: &Provisioner<impl CommandRunner>,
    project: ProjectOptions,
    opts: EnvOptions,
) -> Result<()> {
    let config = project.resolve(Some(&opts), None)?;
    let report = ProvisionReport {
        network: provisioner.network(&config)?,
        ..Default::default()
    };
    log_report(&report);

    Ok(())
}

fn run_identity(
    provisioner: &Provisioner<impl CommandRunner>,
    project: ProjectOptions,
    opts: EnvOptions,
) -> Result<()> {
    let config = project.resolve(Some(&opts), None)?;
    let report = ProvisionReport {
        identity: Some(provisioner.ensure_user_and_group(&(&config.env).into())?),
        ..Default::default()
    };
    log_report(&report);

    Ok(())
}

fn run_storage(
    provisioner: &Provisioner<impl CommandRunner>,
    project: ProjectOptions,
    opts: StorageCommandOptions,
) -> Result<()> {
    let config = project.resolve(None, Some(&opts.storage))?;
    let dry_run = opts.dry_run || config.env.dry_run;
    let report = ProvisionReport {
        storage: Some(provisioner.prepare_storage_path(
            &config.storage_path,
            &config.storage,
            dry_run,
        )?),
        ..Default::default()
    };
    log_report(&report);

    Ok(())
}

fn run_build(
    provisioner: &Provisioner<impl CommandRunner>,
    project: ProjectOptions,
    opts: EnvOptions,
) -> Result<()> {
    let config = project.resolve(Some(&opts), None)?;
    log_report(&provisioner.build(&config)?);

    Ok(())
}

fn run_provision(
    provisioner: &Provisioner<impl CommandRunner>,
    project: ProjectOptions,
    opts: ProvisionOptions,
) -> Result<()> {
    let config = project.resolve(Some(&opts.env), Some(&opts.storage))?;
    log_report(&provisioner.provision(&config)?);

    Ok(())
}

fn log_report(report: &ProvisionReport) {
    if let Some(network) = &report.network {
        info!("network created: {}", network.created);
    }
    if let Some(identity) = &report.identity {
        info!(
            "group created: {}, user created: {}",
            identity.group_created(),
            identity.user_created()
        );
    }
    if let Some(storage) = &report.storage {
        info!("storage path created: {}", storage.created);
    }
    if let Some(image) = &report.image {
        info!("image ready: {image}");
    }
}
