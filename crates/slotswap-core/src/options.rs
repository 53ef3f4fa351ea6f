//! Namespaced option table shared by the core and plugins.
//!
//! Every plugin declares the options it understands, with defaults, under
//! its own namespace (`plugin.<ns>.<KEY>`); the core declares its own under
//! `core.`. Two plugins may therefore both define `ENABLED` without
//! colliding. The table is resolved once at startup into an immutable
//! [`ResolvedOptions`] that is threaded through every hook invocation.
//!
//! Resolution order, lowest to highest: declared default, `[plugins.<ns>]`
//! values in `slotswap.toml`, command-line overrides.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::SlotswapConfig;
use crate::error::{ConfigError, ConfigResult};

pub const CORE_APP_NAME: &str = "core.APP_NAME";
pub const CORE_FORCE: &str = "core.FORCE";
pub const CORE_SKIP_HEALTH_CHECK: &str = "core.SKIP_HEALTH_CHECK";
pub const CORE_CLEAN: &str = "core.CLEAN";

/// Owner of a group of options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Core,
    Plugin(String),
}

impl Namespace {
    pub fn plugin(name: impl Into<String>) -> Self {
        Namespace::Plugin(name.into())
    }

    /// Fully qualified key for `key` in this namespace.
    pub fn key(&self, key: &str) -> String {
        format!("{self}.{key}")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Core => f.write_str("core"),
            Namespace::Plugin(ns) => write!(f, "plugin.{ns}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Declared {
    default: String,
    help: String,
}

/// Recognized options and their defaults, before resolution.
#[derive(Debug, Clone)]
pub struct OptionsTable {
    declared: BTreeMap<String, Declared>,
}

impl Default for OptionsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionsTable {
    /// A table holding only the core options.
    pub fn new() -> Self {
        let mut table = Self {
            declared: BTreeMap::new(),
        };
        let core = [
            (CORE_APP_NAME, "app", "application name"),
            (CORE_FORCE, "false", "proceed past failed health gates"),
            (CORE_SKIP_HEALTH_CHECK, "false", "do not probe the candidate environment"),
            (CORE_CLEAN, "false", "stop the inactive environment after rollback"),
        ];
        for (key, default, help) in core {
            table.declared.insert(
                key.to_string(),
                Declared {
                    default: default.to_string(),
                    help: help.to_string(),
                },
            );
        }
        table
    }

    /// Declare `KEY` with a default under `namespace`.
    pub fn declare(
        &mut self,
        namespace: &Namespace,
        key: &str,
        default: impl Into<String>,
        help: impl Into<String>,
    ) -> ConfigResult<()> {
        let full = namespace.key(key);
        if self.declared.contains_key(&full) {
            return Err(ConfigError::DuplicateOption(full));
        }
        self.declared.insert(
            full,
            Declared {
                default: default.into(),
                help: help.into(),
            },
        );
        Ok(())
    }

    pub fn is_declared(&self, full_key: &str) -> bool {
        self.declared.contains_key(full_key)
    }

    /// `(key, default, help)` for every declared option.
    pub fn describe(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.declared
            .iter()
            .map(|(k, d)| (k.as_str(), d.default.as_str(), d.help.as_str()))
    }

    /// Resolve defaults, configuration values, and overrides into a frozen set.
    ///
    /// Unknown keys in either `[plugins.*]` sections or overrides are rejected.
    pub fn resolve(
        &self,
        config: &SlotswapConfig,
        overrides: &[(String, String)],
    ) -> ConfigResult<ResolvedOptions> {
        let mut values: BTreeMap<String, String> = self
            .declared
            .iter()
            .map(|(k, d)| (k.clone(), d.default.clone()))
            .collect();

        values.insert(CORE_APP_NAME.to_string(), config.app.name.clone());

        for (ns, entries) in &config.plugins {
            let namespace = Namespace::plugin(ns.clone());
            for (key, value) in entries {
                let full = namespace.key(key);
                if !self.declared.contains_key(&full) {
                    return Err(ConfigError::UnknownOption(full));
                }
                values.insert(full, toml_value_to_string(value));
            }
        }

        for (key, value) in overrides {
            if !self.declared.contains_key(key) {
                return Err(ConfigError::UnknownOption(key.clone()));
            }
            values.insert(key.clone(), value.clone());
        }

        Ok(ResolvedOptions { values })
    }
}

/// Parse a `KEY=VALUE` command-line override.
pub fn parse_override(raw: &str) -> ConfigResult<(String, String)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(ConfigError::InvalidOverride(raw.to_string())),
    }
}

fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Immutable, fully resolved options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<String, String>,
}

impl ResolvedOptions {
    /// Build directly from key/value pairs (tests and embedding).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, full_key: &str) -> Option<&str> {
        self.values.get(full_key).map(String::as_str)
    }

    /// Boolean value; absent keys are `false`.
    pub fn get_bool(&self, full_key: &str) -> ConfigResult<bool> {
        match self.get(full_key) {
            None => Ok(false),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" | "" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: full_key.to_string(),
                    value: v.to_string(),
                    expected: "a boolean",
                }),
            },
        }
    }

    /// All options in a namespace with the prefix stripped.
    pub fn namespace(&self, namespace: &Namespace) -> Vec<(&str, &str)> {
        let prefix = format!("{namespace}.");
        self.values
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix.as_str())
                    .map(|short| (short, v.as_str()))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> OptionsTable {
        let mut table = OptionsTable::new();
        let ssl = Namespace::plugin("ssl");
        let notify = Namespace::plugin("notify");
        table.declare(&ssl, "ENABLED", "false", "issue certificates").unwrap();
        table.declare(&notify, "ENABLED", "true", "send notifications").unwrap();
        table.declare(&notify, "CHANNEL", "#deploys", "target channel").unwrap();
        table
    }

    #[test]
    fn same_key_in_two_namespaces_does_not_collide() {
        let resolved = table().resolve(&SlotswapConfig::default(), &[]).unwrap();
        assert_eq!(resolved.get("plugin.ssl.ENABLED"), Some("false"));
        assert_eq!(resolved.get("plugin.notify.ENABLED"), Some("true"));
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let mut table = table();
        let err = table
            .declare(&Namespace::plugin("ssl"), "ENABLED", "true", "")
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOption(k) if k == "plugin.ssl.ENABLED"));
    }

    #[test]
    fn config_then_override_precedence() {
        let config = SlotswapConfig::parse(
            r##"
[app]
name = "shop"
[plugins.notify]
CHANNEL = "#ops"
ENABLED = false
"##,
        )
        .unwrap();
        let overrides = vec![("plugin.notify.CHANNEL".to_string(), "#oncall".to_string())];
        let resolved = table().resolve(&config, &overrides).unwrap();

        assert_eq!(resolved.get(CORE_APP_NAME), Some("shop"));
        assert_eq!(resolved.get("plugin.notify.CHANNEL"), Some("#oncall"));
        assert!(!resolved.get_bool("plugin.notify.ENABLED").unwrap());
    }

    #[test]
    fn unknown_keys_rejected() {
        let config = SlotswapConfig::parse("[plugins.ssl]\nDOMAIN = \"x\"").unwrap();
        assert!(matches!(
            table().resolve(&config, &[]),
            Err(ConfigError::UnknownOption(k)) if k == "plugin.ssl.DOMAIN"
        ));

        let overrides = vec![("core.NOPE".to_string(), "1".to_string())];
        assert!(table().resolve(&SlotswapConfig::default(), &overrides).is_err());
    }

    #[test]
    fn namespace_view_strips_prefix() {
        let resolved = table().resolve(&SlotswapConfig::default(), &[]).unwrap();
        let notify = resolved.namespace(&Namespace::plugin("notify"));
        assert_eq!(notify, vec![("CHANNEL", "#deploys"), ("ENABLED", "true")]);
    }

    #[test]
    fn override_parsing() {
        assert_eq!(
            parse_override("core.FORCE=true").unwrap(),
            ("core.FORCE".to_string(), "true".to_string())
        );
        assert_eq!(parse_override("a.B=x=y").unwrap().1, "x=y");
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=v").is_err());
    }

    #[test]
    fn bool_parsing() {
        let opts = ResolvedOptions::from_pairs([("a", "yes"), ("b", "0"), ("c", "maybe")]);
        assert!(opts.get_bool("a").unwrap());
        assert!(!opts.get_bool("b").unwrap());
        assert!(!opts.get_bool("missing").unwrap());
        assert!(opts.get_bool("c").is_err());
    }
}
