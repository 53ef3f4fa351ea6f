//! Proxy configuration rendering.
//!
//! The configuration is built from a typed [`ProxyConfig`] whose fields are
//! validated before anything is written, so no value can break out of its
//! position in the output. Weights come from a [`TrafficState`] and so
//! always sum to 100.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use slotswap_core::config::validate_app_name;
use slotswap_core::{Endpoint, Slot, TrafficState};

use crate::error::{ProxyError, ProxyResult};

/// One weighted backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Upstream {
    pub slot: Slot,
    pub host: String,
    pub port: u16,
    pub weight: u8,
}

impl Upstream {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the proxy needs to route one application.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProxyConfig {
    pub app_name: String,
    pub health_path: String,
    /// Blue first, then green.
    pub upstreams: [Upstream; 2],
    pub traffic: TrafficState,
}

impl ProxyConfig {
    /// Build and validate a configuration.
    pub fn new(
        app_name: &str,
        health_path: &str,
        blue: &Endpoint,
        green: &Endpoint,
        traffic: TrafficState,
    ) -> ProxyResult<Self> {
        validate_app_name(app_name).map_err(|_| ProxyError::InvalidField {
            field: "app name",
            value: app_name.to_string(),
        })?;
        validate_path(health_path)?;
        validate_host(&blue.host)?;
        validate_host(&green.host)?;

        let upstream = |slot: Slot, ep: &Endpoint| Upstream {
            slot,
            host: ep.host.clone(),
            port: ep.port,
            weight: traffic.weight(slot),
        };

        Ok(Self {
            app_name: app_name.to_string(),
            health_path: health_path.to_string(),
            upstreams: [upstream(Slot::Blue, blue), upstream(Slot::Green, green)],
            traffic,
        })
    }

    /// Upstream block name, e.g. `shop_api_backend`.
    pub fn upstream_name(&self) -> String {
        let base: String = self
            .app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{base}_backend")
    }
}

/// Output of a renderer, ready to hand to a [`crate::ProxyReloader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub traffic: TrafficState,
    pub text: String,
}

/// Turns a [`ProxyConfig`] into the proxy's configuration language.
pub trait ProxyRenderer: Send + Sync {
    fn render(&self, config: &ProxyConfig) -> RenderedConfig;
}

/// Renders an nginx `upstream` block.
///
/// A slot at weight 0 is emitted as `down` (nginx rejects `weight=0`),
/// which keeps it in the file without sending it requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NginxRenderer;

impl ProxyRenderer for NginxRenderer {
    fn render(&self, config: &ProxyConfig) -> RenderedConfig {
        let mut text = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(
            text,
            "# Generated by slotswap for {}. Changes are overwritten on the next shift.",
            config.app_name
        );
        let _ = writeln!(
            text,
            "# traffic: blue={} green={} health={}",
            config.traffic.blue(),
            config.traffic.green(),
            config.health_path
        );
        let _ = writeln!(text, "upstream {} {{", config.upstream_name());
        for upstream in &config.upstreams {
            if upstream.weight == 0 {
                let _ = writeln!(text, "    server {} down;  # {}", upstream.endpoint(), upstream.slot);
            } else {
                let _ = writeln!(
                    text,
                    "    server {} weight={};  # {}",
                    upstream.endpoint(),
                    upstream.weight,
                    upstream.slot
                );
            }
        }
        let _ = writeln!(text, "}}");

        RenderedConfig {
            traffic: config.traffic,
            text,
        }
    }
}

fn validate_host(host: &str) -> ProxyResult<()> {
    static HOST: OnceLock<Regex> = OnceLock::new();
    let re = HOST.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.-]{0,251}[A-Za-z0-9])?$").expect("static regex")
    });
    if re.is_match(host) {
        Ok(())
    } else {
        Err(ProxyError::InvalidField {
            field: "host",
            value: host.to_string(),
        })
    }
}

fn validate_path(path: &str) -> ProxyResult<()> {
    static PATH: OnceLock<Regex> = OnceLock::new();
    let re = PATH.get_or_init(|| Regex::new(r"^/[A-Za-z0-9/._~-]*$").expect("static regex"));
    if re.is_match(path) {
        Ok(())
    } else {
        Err(ProxyError::InvalidField {
            field: "health path",
            value: path.to_string(),
        })
    }
}
