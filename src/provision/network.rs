// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Docker network provisioning.

use crate::{
    command::{argv, CommandRunner},
    provision::{create_or_adopt, exists, ProvisionError, Result},
};

use tracing::{info, instrument};

/// Outcome of ensuring a Docker network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkOutcome {
    /// Network did not exist, and was created by this call.
    pub created: bool,
}

/// Ensure named Docker network exists.
///
/// Existence is the only thing checked. An existing network is never deleted
/// or recreated, even if its configuration differs.
///
/// # Errors
///
/// - Return [`ProvisionError::CreateNetwork`] if `docker network create`
///   fails, and the network still does not exist afterwards.
/// - Return [`ProvisionError::Command`] if `docker` cannot be spawned.
#[instrument(skip(runner), level = "debug")]
pub fn ensure_network(runner: &impl CommandRunner, name: &str) -> Result<NetworkOutcome> {
    info!("checking docker network {name}");
    let inspect = argv(["docker", "network", "inspect", name]);
    if exists(runner, &inspect)? {
        info!("docker network {name} already exists");
        return Ok(NetworkOutcome { created: false });
    }

    info!("creating docker network {name}");
    let create = argv(["docker", "network", "create", name]);
    let created = create_or_adopt(runner, &create, &inspect).map_err(|source| {
        ProvisionError::CreateNetwork {
            name: name.into(),
            source,
        }
    })?;

    if created {
        info!("docker network {name} created");
    }

    Ok(NetworkOutcome { created })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::FakeHost;
    use pretty_assertions::assert_eq;

    #[test]
    fn ensure_network_twice_creates_once() -> anyhow::Result<()> {
        let host = FakeHost::root();

        let result = ensure_network(&host, "forest.network")?;
        assert_eq!(result, NetworkOutcome { created: true });
        assert!(host.has_network("forest.network"));

        let result = ensure_network(&host, "forest.network")?;
        assert_eq!(result, NetworkOutcome { created: false });

        assert_eq!(
            host.calls(),
            vec![
                "docker network inspect forest.network",
                "docker network create forest.network",
                "docker network inspect forest.network",
            ]
        );

        Ok(())
    }

    #[test]
    fn ensure_network_leaves_existing_network_alone() -> anyhow::Result<()> {
        let host = FakeHost::root().with_network("bridge");
        let result = ensure_network(&host, "bridge")?;
        assert_eq!(result, NetworkOutcome { created: false });
        assert_eq!(host.calls(), vec!["docker network inspect bridge"]);

        Ok(())
    }

    #[test]
    fn ensure_network_reports_failed_creation() {
        let host = FakeHost::root().failing("docker network create");
        let result = ensure_network(&host, "forest.network");
        match result {
            Err(ProvisionError::CreateNetwork { name, source }) => {
                assert_eq!(name, "forest.network");
                assert!(source.to_string().contains("exit code 1"));
            }
            other => panic!("expected network creation failure, got {other:?}"),
        }
    }

    #[test]
    fn ensure_network_adopts_concurrently_created_network() -> anyhow::Result<()> {
        let host = FakeHost::root().racing("docker network create");
        let result = ensure_network(&host, "forest.network")?;
        assert_eq!(result, NetworkOutcome { created: false });

        Ok(())
    }
}
