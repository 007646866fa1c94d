//! Descriptor records consumed when building components.
//!
//! These are the raw, unvalidated inputs; [`crate::model`] turns them into immutable values.
//! Scenario files are TOML, one component per file:
//!
//! ```toml
//! name = "sensor"
//! pid = 101
//!
//! [bus]
//! address = "https://localhost:4443"
//!
//! [[events]]
//! name = "go"
//! kind = "input"
//! topic = "sensor/go"
//!
//! [[fsms]]
//! name = "m1"
//! initial = "idle"
//!
//! [[fsms.states]]
//! name = "idle"
//! transitions = [{ event = "go", target = "busy", actions = [] }]
//!
//! [[fsms.states]]
//! name = "busy"
//!
//! [[ports]]
//! name = "uplink"
//! role = "client"
//! transport = "udp"
//! remote = { ip = "127.0.0.1", port = 9000 }
//! fsm = "m1"
//! flows = [
//!     { state = "idle", flow = { kind = "simple", buffer_size = 64, interval = "1s" } },
//!     { state = "busy", flow = { kind = "on_off", buffer_size = 512, interval = "5ms", on = "2s", off = "1s" } },
//! ]
//! ```

pub mod error;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bon::Builder;
use serde::Deserialize;
use tracing::{info, warn};

pub use self::error::{ConfigError, DurationError, LoadError, StartTimeError};

pub const DEFAULT_BUS_ADDRESS: &str = "https://localhost:4443";

/// Every descriptor belonging to one emulated component.
#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct ComponentConfig {
    pub name: String,
    /// Numeric id used only to correlate log records.
    pub pid: u32,
    #[serde(default)]
    #[builder(default)]
    pub bus: BusConfig,
    #[serde(default)]
    #[builder(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    #[builder(default)]
    pub fsms: Vec<FsmConfig>,
    #[serde(default)]
    #[builder(default)]
    pub flows: Vec<FlowConfig>,
    #[serde(default)]
    #[builder(default)]
    pub ports: Vec<PortConfig>,
}

/// Address of the message bus relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct BusConfig {
    pub address: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_BUS_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKindConfig {
    #[serde(alias = "e")]
    Environment,
    #[serde(alias = "i")]
    Input,
    #[serde(alias = "o")]
    Output,
    #[serde(alias = "io")]
    InputOutput,
    #[serde(alias = "l", alias = "local")]
    LocalTimer,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct EventConfig {
    pub name: String,
    pub kind: EventKindConfig,
    /// Bus topic, required for every kind except local timers.
    pub topic: Option<String>,
    /// Timer duration such as `"100ms"`, required for local timers.
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct FsmConfig {
    pub name: String,
    pub initial: String,
    #[serde(default)]
    #[builder(default)]
    pub states: Vec<StateConfig>,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct StateConfig {
    pub name: String,
    #[serde(default)]
    #[builder(default)]
    pub on_entry: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    pub on_exit: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    pub transitions: Vec<TransitionConfig>,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct TransitionConfig {
    pub event: String,
    pub target: String,
    #[serde(default)]
    #[builder(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKindConfig {
    Simple,
    OnOff,
}

/// Traffic shape parameters shared by named and inline flows.
#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct FlowSpec {
    pub kind: FlowKindConfig,
    pub buffer_size: f64,
    pub interval: String,
    pub on: Option<String>,
    pub off: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct FlowConfig {
    pub name: String,
    #[serde(flatten)]
    pub spec: FlowSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRoleConfig {
    #[serde(alias = "s")]
    Server,
    #[serde(alias = "c")]
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportConfig {
    #[serde(alias = "T", alias = "TCP")]
    Tcp,
    #[serde(alias = "U", alias = "UDP")]
    Udp,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct EndpointConfig {
    pub ip: Option<String>,
    pub port: u16,
}

/// A flow referenced by name from the component's flow table, or defined in place.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlowRef {
    Named(String),
    Inline(FlowSpec),
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct StateFlowConfig {
    pub state: String,
    pub flow: FlowRef,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct PortConfig {
    pub name: String,
    pub role: PortRoleConfig,
    pub transport: TransportConfig,
    /// Bind address, required for servers.
    pub local: Option<EndpointConfig>,
    /// Peer address, required for clients.
    pub remote: Option<EndpointConfig>,
    /// Name of the FSM whose state selects the active flow (clients only).
    pub fsm: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub flows: Vec<StateFlowConfig>,
}

/// Convert a duration string with a mandatory `ms` or `s` unit into fractional milliseconds.
pub fn parse_duration_ms(value: &str) -> Result<f64, DurationError> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
        .ok_or_else(|| DurationError::MissingUnit(value.to_string()))?;
    let (number, unit) = value.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| DurationError::InvalidNumber(value.to_string()))?;
    if !number.is_finite() || number < 0.0 {
        return Err(DurationError::InvalidNumber(value.to_string()));
    }

    match unit {
        "ms" => Ok(number),
        "s" => Ok(number * 1000.0),
        _ => Err(DurationError::UnsupportedUnit(value.to_string())),
    }
}

/// Delay from `now` until the UTC time of day `target`, given as `HH:MM:SS` on the same day.
pub fn delay_until_time_of_day(target: &str, now: SystemTime) -> Result<Duration, StartTimeError> {
    let format_error = || StartTimeError::Format(target.to_string());

    let fields: Vec<u64> = target
        .trim()
        .split(':')
        .map(|field| field.parse::<u64>().map_err(|_| format_error()))
        .collect::<Result<_, _>>()?;
    let [hours, minutes, seconds] = fields[..] else {
        return Err(format_error());
    };
    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(format_error());
    }
    let target_secs = hours * 3600 + minutes * 60 + seconds;

    let since_midnight = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() % 86_400;
    if target_secs <= since_midnight {
        return Err(StartTimeError::NotInFuture(target.to_string()));
    }
    Ok(Duration::from_secs(target_secs - since_midnight))
}

/// Parse one component from TOML text.
pub fn parse_component(text: &str) -> Result<ComponentConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Load a single scenario file.
pub fn load_file(path: &Path) -> Result<ComponentConfig, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_component(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every `*.toml` file in `dir`, in file name order.
///
/// Only a failure to list the directory is returned; individual files that fail to load are
/// logged and skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<ComponentConfig>, LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        match load_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), component = %config.name, "Loaded scenario file");
                configs.push(config);
            }
            Err(e) => warn!(error = %e, cause = ?std::error::Error::source(&e), "Skipping scenario file"),
        }
    }

    Ok(configs)
}
