// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Default port resolution.
//!
//! Each project gets a network port through a layered lookup:
//!
//! 1. Explicit override, if it parses as a port in `1..=65535`.
//! 2. Built-in [`PortDefaultTable`] keyed by project identifier.
//! 3. Pluggable [`PortProvider`], if one was supplied.
//!
//! If all three miss, resolution fails with [`UnresolvedPort`] before any
//! external side effect takes place. Explicit configuration always wins, the
//! built-in table covers well-known projects, and a provider lets an umbrella
//! project extend the table without touching this module.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Built-in mapping of project identifier to default port.
///
/// Unknown identifiers yield `None`, never a made up port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortDefaultTable;

impl PortDefaultTable {
    /// Well-known project identifiers and their ports.
    pub const ENTRIES: &'static [(&'static str, u16)] = &[
        ("cellblock", 3306),
        ("fantti", 5432),
        ("puppu", 5100),
        ("redis", 6379),
    ];

    /// Construct new default port table.
    pub fn new() -> Self {
        Self
    }

    /// Lookup default port of project identifier.
    pub fn lookup(&self, identifier: &str) -> Option<u16> {
        Self::ENTRIES
            .iter()
            .find(|(name, _)| *name == identifier)
            .map(|(_, port)| *port)
    }
}

/// Fallback port lookup.
///
/// Only queried when the explicit override and the built-in table both miss.
/// Any `Fn(&str) -> Option<u16>` is a provider.
pub trait PortProvider {
    /// Resolve identifier to a port, or `None` if unresolved.
    fn default_port(&self, identifier: &str) -> Option<u16>;
}

impl<F> PortProvider for F
where
    F: Fn(&str) -> Option<u16>,
{
    fn default_port(&self, identifier: &str) -> Option<u16> {
        self(identifier)
    }
}

/// User supplied port table.
///
/// Lets a project configuration file extend the built-in table through a
/// `[ports]` section.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PortMap(BTreeMap<String, u16>);

impl PortMap {
    /// Construct new empty port map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, port: u16) {
        self.0.insert(identifier.into(), port);
    }
}

impl<S> FromIterator<(S, u16)> for PortMap
where
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (S, u16)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, port)| (name.into(), port)).collect())
    }
}

impl PortProvider for PortMap {
    fn default_port(&self, identifier: &str) -> Option<u16> {
        self.0.get(identifier).copied()
    }
}

/// Resolve port of project identifier.
///
/// An override that does not parse as a non-zero port is ignored with a
/// warning, and resolution moves on to the table. Providers answering with
/// port zero count as unresolved.
///
/// # Errors
///
/// - Return [`UnresolvedPort`] if no layer yields a port.
pub fn resolve_port(
    identifier: &str,
    explicit: Option<&str>,
    table: &PortDefaultTable,
    provider: Option<&dyn PortProvider>,
) -> Result<u16, UnresolvedPort> {
    if let Some(value) = explicit {
        match parse_port(value) {
            Some(port) => {
                debug!("{identifier} port {port} from explicit override");
                return Ok(port);
            }
            None => warn!("ignoring invalid port override {value:?} for {identifier}"),
        }
    }

    if let Some(port) = table.lookup(identifier) {
        debug!("{identifier} port {port} from default table");
        return Ok(port);
    }

    if let Some(port) = provider
        .and_then(|provider| provider.default_port(identifier))
        .filter(|port| *port != 0)
    {
        debug!("{identifier} port {port} from port provider");
        return Ok(port);
    }

    Err(UnresolvedPort {
        identifier: identifier.into(),
    })
}

fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

/// No layer of port resolution produced a port.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no resolvable port for {identifier}: set {identifier}.port or supply a port provider")]
pub struct UnresolvedPort {
    pub identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("cellblock", 3306; "cellblock")]
    #[test_case("fantti", 5432; "fantti")]
    #[test_case("puppu", 5100; "puppu")]
    #[test_case("redis", 6379; "redis")]
    #[test]
    fn resolve_port_from_default_table(identifier: &str, expect: u16) {
        let result = resolve_port(identifier, None, &PortDefaultTable::new(), None);
        assert_eq!(result, Ok(expect));
    }

    #[test]
    fn resolve_port_prefers_override_then_table_then_provider() {
        let table = PortDefaultTable::new();
        let provider = |_: &str| Some(7000u16);

        let result = resolve_port("redis", Some("6380"), &table, Some(&provider));
        assert_eq!(result, Ok(6380));

        let result = resolve_port("redis", None, &table, Some(&provider));
        assert_eq!(result, Ok(6379));

        let result = resolve_port("unknown-app", None, &table, Some(&provider));
        assert_eq!(result, Ok(7000));
    }

    #[test_case("0"; "zero")]
    #[test_case("-1"; "negative")]
    #[test_case("70000"; "out_of_range")]
    #[test_case("http"; "not_a_number")]
    #[test]
    fn resolve_port_skips_invalid_override(value: &str) {
        let result = resolve_port("redis", Some(value), &PortDefaultTable::new(), None);
        assert_eq!(result, Ok(6379));
    }

    #[test]
    fn resolve_port_fails_without_any_layer() {
        let result = resolve_port("unknown-app", None, &PortDefaultTable::new(), None);
        assert_eq!(
            result,
            Err(UnresolvedPort {
                identifier: "unknown-app".into()
            })
        );
    }

    #[test]
    fn resolve_port_fails_when_provider_unresolved() {
        let table = PortDefaultTable::new();
        let provider: PortMap = [("other", 8080u16)].into_iter().collect();

        let result = resolve_port("unknown-app", None, &table, Some(&provider));
        assert!(result.is_err());

        let zero = |_: &str| Some(0u16);
        let result = resolve_port("unknown-app", None, &table, Some(&zero));
        assert!(result.is_err());
    }
}
