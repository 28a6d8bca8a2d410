// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host user and group provisioning.
//!
//! Ensures a named group, and a named user bound to that group, exist on the
//! host. The group always comes first, because user creation references it.
//! Users are created as login-disabled accounts without a home directory.
//!
//! Creating accounts requires root. Environments that cannot provision host
//! accounts, e.g., sandboxed CI, can opt into skipping the whole step when not
//! running as root.

use crate::{
    command::{argv, CommandRunner},
    config::EnvSettings,
    provision::{create_or_adopt, exists, ProvisionError, Result},
};

use tracing::{debug, info, instrument, warn};

/// Shell given to created users.
pub const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";

/// Host group and user to ensure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest<'a> {
    pub group_name: &'a str,
    pub user_name: &'a str,

    /// Explicit UID, OS assigned if absent.
    pub uid: Option<u32>,

    /// Explicit GID, OS assigned if absent.
    pub gid: Option<u32>,

    pub skip_if_no_privileges: bool,
    pub dry_run: bool,
}

impl<'a> From<&'a EnvSettings> for IdentityRequest<'a> {
    fn from(env: &'a EnvSettings) -> Self {
        Self {
            group_name: &env.group_name,
            user_name: &env.user_name,
            uid: env.numeric_uid(),
            gid: env.numeric_gid(),
            skip_if_no_privileges: env.skip_if_no_privileges,
            dry_run: env.dry_run,
        }
    }
}

/// Outcome of ensuring host group and user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// Not running as root, and asked to skip.
    Skipped,

    /// Intended actions were only reported.
    DryRun,

    /// Group and user exist now.
    Ensured {
        group_created: bool,
        user_created: bool,
    },
}

impl IdentityOutcome {
    pub fn group_created(&self) -> bool {
        matches!(self, Self::Ensured { group_created: true, .. })
    }

    pub fn user_created(&self) -> bool {
        matches!(self, Self::Ensured { user_created: true, .. })
    }
}

/// Ensure host group and user exist.
///
/// # Errors
///
/// - Return [`ProvisionError::CreateGroup`] if `groupadd` fails.
/// - Return [`ProvisionError::CreateUser`] if `useradd` fails.
/// - Return [`ProvisionError::Command`] if an inspection command cannot be
///   spawned.
#[instrument(skip(runner), level = "debug")]
pub fn ensure_user_and_group(
    runner: &impl CommandRunner,
    request: &IdentityRequest<'_>,
) -> Result<IdentityOutcome> {
    let privileged = effective_uid(runner) == Some(0);
    if !privileged {
        if request.skip_if_no_privileges {
            info!("not running as root, skipping host user and group creation as requested");
            return Ok(IdentityOutcome::Skipped);
        }

        warn!("not running as root, host user and group creation will likely fail");
    }

    if request.dry_run {
        info!(
            "[dry-run] would ensure group {} and user {} (uid={:?} gid={:?})",
            request.group_name, request.user_name, request.uid, request.gid
        );
        return Ok(IdentityOutcome::DryRun);
    }

    let group_created = ensure_group(runner, request)?;
    let user_created = ensure_user(runner, request)?;

    Ok(IdentityOutcome::Ensured {
        group_created,
        user_created,
    })
}

fn ensure_group(runner: &impl CommandRunner, request: &IdentityRequest<'_>) -> Result<bool> {
    let group = request.group_name;
    info!("checking group {group}");
    let inspect = argv(["getent", "group", group]);
    if exists(runner, &inspect)? {
        info!("group {group} already exists");
        return Ok(false);
    }

    let mut create = argv(["groupadd"]);
    if let Some(gid) = request.gid {
        create.extend(["-g".into(), gid.to_string()]);
    }
    create.push(group.into());

    info!("creating group: {}", create.join(" "));
    let created = create_or_adopt(runner, &create, &inspect).map_err(|source| {
        ProvisionError::CreateGroup {
            name: group.into(),
            source,
        }
    })?;
    if created {
        info!("group {group} created");
    }

    Ok(created)
}

fn ensure_user(runner: &impl CommandRunner, request: &IdentityRequest<'_>) -> Result<bool> {
    let user = request.user_name;
    info!("checking user {user}");
    let inspect = argv(["id", "-u", user]);
    if exists(runner, &inspect)? {
        info!("user {user} already exists");
        return Ok(false);
    }

    let mut create = argv(["useradd", "-M", "-s", NOLOGIN_SHELL, "-g", request.group_name]);
    if let Some(uid) = request.uid {
        create.extend(["-u".into(), uid.to_string()]);
    }
    create.push(user.into());

    info!("creating user: {}", create.join(" "));
    let created = create_or_adopt(runner, &create, &inspect).map_err(|source| {
        ProvisionError::CreateUser {
            name: user.into(),
            source,
        }
    })?;
    if created {
        info!("user {user} created");
    }

    Ok(created)
}

/// Effective UID of the current process, if it can be determined.
fn effective_uid(runner: &impl CommandRunner) -> Option<u32> {
    match runner.run(&argv(["id", "-u"]), false) {
        Ok(output) => output.stdout().trim().parse().ok(),
        Err(err) => {
            debug!("cannot determine effective uid: {err}");
            None
        }
    }
}
