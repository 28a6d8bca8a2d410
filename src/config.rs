// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout and resolution.
//!
//! Every provisioning run works off one immutable [`ProvisioningConfig`]
//! built up front. Building it never spawns a process, so merely describing
//! what would be provisioned has no side effects.
//!
//! # Resolution Order
//!
//! Each project value is looked up in layers:
//!
//! 1. Explicit [`Properties`], e.g., `-P redis.port=6380` on the command line.
//! 2. The project-local `moon.toml` file, see [`ProjectFile`].
//! 3. A built-in default, or for ports, the default table followed by a
//!    pluggable [`PortProvider`].
//!
//! A port that resolves through none of these layers is a hard failure.
//!
//! # Project File Layout
//!
//! Project values are addressed by dotted keys of the form
//! `<project>.<name>`. Both TOML tables and literal dotted keys work:
//!
//! ```toml
//! [redis]
//! port = 6380
//! image.version = "7.2"
//!
//! [env]
//! network_name = "forest.network"
//! dry_run = true
//!
//! [storage]
//! owner = "forest.user"
//! mode = "0750"
//!
//! [ports]
//! kuikka = 8089
//! ```
//!
//! The `env`, `storage`, and `ports` tables hold settings, not project
//! values. A project named after one of them can only receive its values
//! through explicit [`Properties`], see [`RESERVED_TABLES`].

use crate::{
    path::{absolutize, default_storage_path, expand, PathError, PROJECT_FILE_NAME},
    port::{resolve_port, PortDefaultTable, PortMap, PortProvider, UnresolvedPort},
};

use serde::{Deserialize, Deserializer};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use toml::{Table, Value};
use tracing::{debug, warn};

/// Top-level tables of the project file that hold settings, not project
/// values.
pub const RESERVED_TABLES: &[&str] = &["env", "storage", "ports"];

/// Fully resolved configuration of one project.
///
/// Constructed once per run, and passed by reference into every provisioning
/// step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Project identifier.
    pub identifier: String,

    /// Resolved network port.
    pub port: u16,

    /// Service user of the project.
    pub user: String,

    /// Database name of the project.
    pub database: String,

    /// Storage directory to prepare.
    pub storage_path: PathBuf,

    /// Docker image name.
    pub image_name: String,

    /// Docker image tag.
    pub image_version: String,

    /// Dockerfile to build with, if it exists.
    pub dockerfile: PathBuf,

    /// Docker build context.
    pub context_dir: PathBuf,

    /// Build-time UID, auto-detected if absent.
    pub uid: Option<String>,

    /// Build-time GID, auto-detected if absent.
    pub gid: Option<String>,

    /// Host environment settings.
    pub env: EnvSettings,

    /// Storage ownership and permission policy.
    pub storage: StorageSettings,
}

impl ProvisioningConfig {
    /// Resolve configuration of project.
    ///
    /// The `[ports]` table of the project file acts as port provider if no
    /// other provider is given.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Port`] if no port can be resolved.
    /// - Return [`ConfigError::Path`] if shell expansion of the storage path
    ///   fails.
    pub fn resolve(
        identifier: impl Into<String>,
        project_dir: impl AsRef<Path>,
        properties: &Properties,
        file: &ProjectFile,
        provider: Option<&dyn PortProvider>,
    ) -> Result<Self> {
        let identifier = identifier.into();
        let project_dir = project_dir.as_ref();
        if RESERVED_TABLES.contains(&identifier.as_str()) {
            warn!(
                "project {identifier:?} is named after a settings table of {PROJECT_FILE_NAME}, \
                 only explicit properties apply to it"
            );
        }
        let lookup = Lookup {
            identifier: &identifier,
            properties,
            file,
        };

        let provider = provider.or_else(|| {
            if file.ports.is_empty() {
                None
            } else {
                Some(&file.ports as &dyn PortProvider)
            }
        });
        let port_override = lookup.project("port");
        let port = resolve_port(
            &identifier,
            port_override.as_deref(),
            &PortDefaultTable::new(),
            provider,
        )?;

        let storage_path = match lookup.project("storage") {
            Some(path) => absolutize(project_dir, expand(path)?),
            None => default_storage_path(&identifier),
        };

        let config = Self {
            port,
            user: lookup.project("user").unwrap_or_else(|| identifier.clone()),
            database: lookup
                .project("database")
                .unwrap_or_else(|| identifier.clone()),
            storage_path,
            image_name: lookup
                .project("image.name")
                .unwrap_or_else(|| format!("{identifier}-moon")),
            image_version: lookup
                .project("image.version")
                .unwrap_or_else(|| "1.0.0".into()),
            dockerfile: project_dir.join("Dockerfile"),
            context_dir: project_dir.to_path_buf(),
            uid: lookup.first(&[format!("{identifier}.uid"), "uid".into()]),
            gid: lookup.first(&[format!("{identifier}.gid"), "gid".into()]),
            env: file.env.clone(),
            storage: file.storage.clone(),
            identifier,
        };
        debug!("resolved configuration {config:?}");

        Ok(config)
    }
}

impl Display for ProvisioningConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "Port: {}", self.port)?;
        writeln!(fmt, "User: {}", self.user)?;
        writeln!(fmt, "Database: {}", self.database)?;
        writeln!(fmt, "Storage Path: {}", self.storage_path.display())?;
        writeln!(fmt, "Image name: {}", self.image_name)?;
        writeln!(fmt, "version: {}", self.image_version)
    }
}

struct Lookup<'a> {
    identifier: &'a str,
    properties: &'a Properties,
    file: &'a ProjectFile,
}

impl Lookup<'_> {
    /// First key that resolves, explicit properties before the file.
    fn first(&self, keys: &[String]) -> Option<String> {
        keys.iter().find_map(|key| {
            self.properties
                .get(key)
                .map(str::to_owned)
                .or_else(|| self.file.property(key))
        })
    }

    fn project(&self, name: &str) -> Option<String> {
        self.first(&[format!("{}.{name}", self.identifier)])
    }
}

/// Explicit property overrides.
///
/// Highest precedence layer of configuration resolution.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    /// Construct new empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|property| (property.key, property.value))
                .collect(),
        )
    }
}

/// Single `key=value` property assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl FromStr for Property {
    type Err = MalformedProperty;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Self {
                key: key.trim().into(),
                value: value.into(),
            }),
            _ => Err(MalformedProperty(data.into())),
        }
    }
}

/// Property assignment is not of the form `key=value`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed property {0:?}, expected key=value")]
pub struct MalformedProperty(pub String);

/// Project-local configuration file layout.
///
/// Read once at configuration time, and never written.
#[derive(Default, Debug, PartialEq, Clone, Deserialize)]
pub struct ProjectFile {
    /// Host environment settings.
    #[serde(default)]
    pub env: EnvSettings,

    /// Storage ownership and permission policy.
    #[serde(default)]
    pub storage: StorageSettings,

    /// Ports of projects missing from the built-in table.
    #[serde(default)]
    pub ports: PortMap,

    /// Everything else, addressed by dotted keys.
    #[serde(flatten)]
    pub properties: Table,
}

impl ProjectFile {
    /// Load project file from project directory.
    ///
    /// A missing file is treated as an empty one.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ReadFile`] if the file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if the file is not valid.
    pub fn load(project_dir: impl AsRef<Path>) -> Result<Self> {
        let path = project_dir.as_ref().join(PROJECT_FILE_NAME);
        if !path.exists() {
            debug!("no project file at {:?}", path.display());
            return Ok(Self::default());
        }

        let data = read_to_string(&path).map_err(|err| ConfigError::ReadFile {
            source: err,
            path: path.clone(),
        })?;
        data.parse()
    }

    /// Lookup property by dotted key.
    ///
    /// Strings, integers, floats, and booleans are returned in string form.
    pub fn property(&self, key: &str) -> Option<String> {
        lookup_dotted(&self.properties, key).and_then(value_to_string)
    }
}

impl FromStr for ProjectFile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

// INVARIANT: A literal key wins over a nested table path of the same spelling.
fn lookup_dotted<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
    if let Some(value) = table.get(key) {
        return Some(value);
    }

    key.match_indices('.').find_map(|(idx, _)| {
        let (head, tail) = (&key[..idx], &key[idx + 1..]);
        match table.get(head) {
            Some(Value::Table(inner)) => lookup_dotted(inner, tail),
            _ => None,
        }
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Integer(value) => Some(value.to_string()),
        Value::Float(value) => Some(value.to_string()),
        Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_string))
}

/// Host environment settings.
///
/// Shared by every project of a run: one Docker network, and one host
/// user and group pair.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Docker network to ensure.
    pub network_name: String,

    /// Host user to ensure.
    pub user_name: String,

    /// Host group to ensure.
    pub group_name: String,

    /// Explicit UID of host user.
    #[serde(deserialize_with = "lenient_string")]
    pub uid: Option<String>,

    /// Explicit GID of host group.
    #[serde(deserialize_with = "lenient_string")]
    pub gid: Option<String>,

    /// Ensure network, group, and user before building images.
    pub integrate_with_host_lifecycle: bool,

    /// Skip host user and group creation when not running as root.
    pub skip_if_no_privileges: bool,

    /// Report intended actions without performing them.
    pub dry_run: bool,
}

impl EnvSettings {
    /// Explicit UID as number.
    ///
    /// Non-numeric values are treated as absent, letting the OS assign one.
    pub fn numeric_uid(&self) -> Option<u32> {
        parse_id(self.uid.as_deref())
    }

    /// Explicit GID as number.
    ///
    /// Non-numeric values are treated as absent, letting the OS assign one.
    pub fn numeric_gid(&self) -> Option<u32> {
        parse_id(self.gid.as_deref())
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            network_name: "forest.network".into(),
            user_name: "forest.user".into(),
            group_name: "forest.group".into(),
            uid: None,
            gid: None,
            integrate_with_host_lifecycle: false,
            skip_if_no_privileges: false,
            dry_run: false,
        }
    }
}

/// Parse numeric user or group ID, ignoring blank and garbage input.
pub fn parse_id(value: Option<&str>) -> Option<u32> {
    let value = value.map(str::trim).filter(|value| !value.is_empty())?;
    match value.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            debug!("ignoring non-numeric id {value:?}");
            None
        }
    }
}

/// Storage ownership and permission policy.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Owner to hand storage over to.
    #[serde(deserialize_with = "lenient_string")]
    pub owner: Option<String>,

    /// Group to hand storage over to.
    #[serde(deserialize_with = "lenient_string")]
    pub group: Option<String>,

    /// Permission bits in `chmod` syntax.
    #[serde(deserialize_with = "lenient_string")]
    pub mode: Option<String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Project file exists, but cannot be read.
    #[error("failed to read project file at {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize project file.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to resolve path.
    #[error(transparent)]
    Path(#[from] PathError),

    /// No port could be resolved.
    #[error(transparent)]
    Port(#[from] UnresolvedPort),

    /// Docker build context does not exist.
    #[error("docker build context does not exist: {:?}", path.display())]
    MissingBuildContext { path: PathBuf },
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn resolve(
        identifier: &str,
        properties: &Properties,
        file: &str,
    ) -> Result<ProvisioningConfig> {
        let file: ProjectFile = file.parse()?;
        ProvisioningConfig::resolve(identifier, "/work/app", properties, &file, None)
    }

    #[test]
    fn deserialize_project_file() -> anyhow::Result<()> {
        let result: ProjectFile = indoc! {r#"
            "puppu.user" = "pupu"

            [redis]
            port = 6380
            image.version = "7.2"

            [env]
            network_name = "moon.net"
            uid = 1500
            gid = "not-a-number"
            dry_run = true

            [storage]
            owner = "forest.user"
            mode = 750

            [ports]
            kuikka = 8089
        "#}
        .parse()?;

        assert_eq!(result.property("redis.port"), Some("6380".into()));
        assert_eq!(result.property("redis.image.version"), Some("7.2".into()));
        assert_eq!(result.property("puppu.user"), Some("pupu".into()));
        assert_eq!(result.property("redis.user"), None);
        assert_eq!(
            result.env,
            EnvSettings {
                network_name: "moon.net".into(),
                uid: Some("1500".into()),
                gid: Some("not-a-number".into()),
                dry_run: true,
                ..Default::default()
            }
        );
        assert_eq!(result.env.numeric_uid(), Some(1500));
        assert_eq!(result.env.numeric_gid(), None);
        assert_eq!(
            result.storage,
            StorageSettings {
                owner: Some("forest.user".into()),
                group: None,
                mode: Some("750".into()),
            }
        );
        assert_eq!(result.ports, PortMap::from_iter([("kuikka", 8089u16)]));

        Ok(())
    }

    #[test]
    fn resolve_defaults_from_identifier() -> anyhow::Result<()> {
        let result = resolve("redis", &Properties::new(), "")?;
        let expect = ProvisioningConfig {
            identifier: "redis".into(),
            port: 6379,
            user: "redis".into(),
            database: "redis".into(),
            storage_path: "/var/lib/redis".into(),
            image_name: "redis-moon".into(),
            image_version: "1.0.0".into(),
            dockerfile: "/work/app/Dockerfile".into(),
            context_dir: "/work/app".into(),
            uid: None,
            gid: None,
            env: EnvSettings::default(),
            storage: StorageSettings::default(),
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_prefers_explicit_properties_over_file() -> anyhow::Result<()> {
        let file = indoc! {r#"
            uid = 1000
            [fantti]
            port = 15432
            user = "file-user"
            database = "file-db"
            gid = 2000
            image = { name = "fantti-db", version = "16" }
        "#};
        let properties: Properties = ["fantti.port=25432", "fantti.user=cli-user"]
            .into_iter()
            .map(str::parse::<Property>)
            .collect::<Result<Properties, _>>()?;

        let result = resolve("fantti", &properties, file)?;
        assert_eq!(result.port, 25432);
        assert_eq!(result.user, "cli-user");
        assert_eq!(result.database, "file-db");
        assert_eq!(result.image_name, "fantti-db");
        assert_eq!(result.image_version, "16");
        assert_eq!(result.uid, Some("1000".into()));
        assert_eq!(result.gid, Some("2000".into()));

        Ok(())
    }

    #[test]
    fn resolve_uses_ports_table_as_provider() -> anyhow::Result<()> {
        let result = resolve("kuikka", &Properties::new(), "[ports]\nkuikka = 8089\n")?;
        assert_eq!(result.port, 8089);

        Ok(())
    }

    #[test]
    fn resolve_fails_on_unknown_project() {
        let result = resolve("unknown-app", &Properties::new(), "");
        assert!(matches!(
            result,
            Err(ConfigError::Port(UnresolvedPort { identifier })) if identifier == "unknown-app"
        ));
    }

    #[test]
    fn resolve_reserved_identifier_ignores_settings_table() -> anyhow::Result<()> {
        let file = indoc! {r#"
            [storage]
            port = 7000
            mode = "0750"
        "#};

        let result = resolve("storage", &Properties::new(), file);
        assert!(matches!(result, Err(ConfigError::Port(_))));

        let properties: Properties = ["storage.port=7001".parse::<Property>()?]
            .into_iter()
            .collect();
        let result = resolve("storage", &properties, file)?;
        assert_eq!(result.port, 7001);
        assert_eq!(result.storage.mode, Some("0750".into()));

        Ok(())
    }

    #[sealed_test(env = [("MOON_DATA", "/srv/moon")])]
    fn resolve_expands_storage_path() -> anyhow::Result<()> {
        let result = resolve("redis", &Properties::new(), "redis.storage = \"$MOON_DATA/redis\"")?;
        assert_eq!(result.storage_path, PathBuf::from("/srv/moon/redis"));

        let result = resolve("redis", &Properties::new(), "redis.storage = \"data\"")?;
        assert_eq!(result.storage_path, PathBuf::from("/work/app/data"));

        Ok(())
    }

    #[sealed_test]
    fn load_missing_project_file() -> anyhow::Result<()> {
        let result = ProjectFile::load(std::env::current_dir()?)?;
        assert_eq!(result, ProjectFile::default());

        Ok(())
    }

    #[test]
    fn parse_property_assignment() {
        assert_eq!(
            "redis.port=6380".parse::<Property>(),
            Ok(Property {
                key: "redis.port".into(),
                value: "6380".into()
            })
        );
        assert_eq!(
            "uid=".parse::<Property>(),
            Ok(Property {
                key: "uid".into(),
                value: "".into()
            })
        );
        assert!("=6380".parse::<Property>().is_err());
        assert!("redis.port".parse::<Property>().is_err());
    }

    #[test]
    fn display_resolved_properties() -> anyhow::Result<()> {
        let result = resolve("puppu", &Properties::new(), "")?.to_string();
        let expect = indoc! {r#"
            Port: 5100
            User: puppu
            Database: puppu
            Storage Path: /var/lib/puppu
            Image name: puppu-moon
            version: 1.0.0
        "#};
        assert_eq!(result, expect);

        Ok(())
    }
}
