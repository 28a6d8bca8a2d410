// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local development environment provisioner.
//!
//! Moonenv brings up the host infrastructure a project needs for local
//! development: a default network port, a Docker network, a host group and
//! user, a storage directory with the right ownership and permissions, and a
//! Docker image. It does so by shelling out to `docker`, `getent`,
//! `groupadd`, `useradd`, `chown`, and `chmod`, inspecting exit codes along
//! the way.
//!
//! Configuration is resolved up front into a [`ProvisioningConfig`] without
//! side effects. Provisioning then runs through a [`Provisioner`], where each
//! step is idempotent and safe to re-run.

pub mod command;
pub mod config;
pub mod path;
pub mod port;
pub mod provision;

pub use command::{CommandError, CommandOutput, CommandRunner, SystemRunner};
pub use config::{
    ConfigError, EnvSettings, ProjectFile, Properties, ProvisioningConfig, StorageSettings,
};
pub use port::{resolve_port, PortDefaultTable, PortMap, PortProvider, UnresolvedPort};
pub use provision::{ProvisionError, ProvisionReport, Provisioner};
