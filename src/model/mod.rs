//! Immutable component model built from [`crate::config`] descriptors.
//!
//! Validation never fails as a whole: each rejected object is logged, reported in the returned
//! error list and left out of the model, while its siblings keep loading.

pub mod event;
pub mod flow;
pub mod fsm;
pub mod port;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::{
    ComponentConfig, ConfigError, DurationError, EndpointConfig, EventConfig, EventKindConfig,
    FlowConfig, FlowKindConfig, FlowRef, FlowSpec, FsmConfig, PortConfig, PortRoleConfig,
    TransportConfig, parse_duration_ms,
};

pub use self::event::{Event, EventKind};
pub use self::flow::{Flow, FlowError, FlowShape};
pub use self::fsm::{FsmDefinition, FsmDefinitionError, State, Transition};
pub use self::port::{ClientEndpoint, Port, PortRole, Transport};

const DEFAULT_SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const CLIENT_LOCAL: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

#[derive(Debug, Clone)]
pub struct ComponentModel {
    pub name: String,
    pub pid: u32,
    pub bus_address: String,
    pub events: HashMap<String, Arc<Event>>,
    pub fsms: BTreeMap<String, FsmDefinition>,
    pub flows: HashMap<String, Arc<Flow>>,
    pub ports: BTreeMap<String, Arc<Port>>,
}

impl ComponentModel {
    /// Validate `config`, returning the model and every rejected object.
    pub fn from_config(config: &ComponentConfig) -> (Self, Vec<ConfigError>) {
        let mut builder = ModelBuilder {
            component: &config.name,
            pid: config.pid,
            errors: Vec::new(),
            anonymous_flows: 0,
        };

        let events = builder.events(&config.events);
        let fsms = builder.fsms(&config.fsms, &events);
        let flows = builder.flows(&config.flows);
        let ports = builder.ports(&config.ports, &fsms, &flows);

        let model = Self {
            name: config.name.clone(),
            pid: config.pid,
            bus_address: config.bus.address.clone(),
            events,
            fsms,
            flows,
            ports,
        };
        (model, builder.errors)
    }
}

struct ModelBuilder<'a> {
    component: &'a str,
    pid: u32,
    errors: Vec<ConfigError>,
    anonymous_flows: usize,
}

impl ModelBuilder<'_> {
    fn reject(&mut self, error: ConfigError) {
        warn!(component = %self.component, pid = self.pid, error = %error, "Rejected configuration object");
        self.errors.push(error);
    }

    fn events(&mut self, configs: &[EventConfig]) -> HashMap<String, Arc<Event>> {
        let mut events = HashMap::new();
        for config in configs {
            if events.contains_key(&config.name) {
                self.reject(ConfigError::Duplicate {
                    kind: "event",
                    name: config.name.clone(),
                });
                continue;
            }
            match event_from_config(config) {
                Ok(event) => {
                    events.insert(config.name.clone(), Arc::new(event));
                }
                Err(e) => self.reject(e),
            }
        }
        events
    }

    fn fsms(
        &mut self,
        configs: &[FsmConfig],
        events: &HashMap<String, Arc<Event>>,
    ) -> BTreeMap<String, FsmDefinition> {
        let mut fsms = BTreeMap::new();
        for config in configs {
            if fsms.contains_key(&config.name) {
                self.reject(ConfigError::Duplicate {
                    kind: "fsm",
                    name: config.name.clone(),
                });
                continue;
            }
            if let Some(definition) = self.fsm(config, events) {
                fsms.insert(config.name.clone(), definition);
            }
        }
        fsms
    }

    fn fsm(&mut self, config: &FsmConfig, events: &HashMap<String, Arc<Event>>) -> Option<FsmDefinition> {
        let mut seen = HashSet::new();
        let unique_states: Vec<_> = config
            .states
            .iter()
            .filter(|state| {
                let fresh = seen.insert(state.name.as_str());
                if !fresh {
                    self.reject(ConfigError::Duplicate {
                        kind: "state",
                        name: format!("{}/{}", config.name, state.name),
                    });
                }
                fresh
            })
            .collect();

        let mut states = Vec::with_capacity(unique_states.len());
        for state in unique_states {
            let path = format!("{}/{}", config.name, state.name);
            let on_entry = self.action_list(&path, &state.on_entry, events);
            let on_exit = self.action_list(&path, &state.on_exit, events);

            let mut transitions: Vec<Transition> = Vec::new();
            for transition in &state.transitions {
                let name = format!("{path}/{}", transition.event);
                if transitions.iter().any(|t| t.event() == transition.event) {
                    self.reject(ConfigError::Duplicate {
                        kind: "transition",
                        name,
                    });
                    continue;
                }
                if !seen.contains(transition.target.as_str()) {
                    self.reject(ConfigError::MissingReference {
                        kind: "transition",
                        name,
                        referenced_kind: "state",
                        referenced: transition.target.clone(),
                    });
                    continue;
                }
                let actions = self.action_list(&name, &transition.actions, events);
                transitions.push(Transition::new(
                    transition.event.clone(),
                    transition.target.clone(),
                    actions,
                ));
            }

            states.push(State::new(state.name.clone(), on_entry, on_exit, transitions));
        }

        match FsmDefinition::new(config.name.clone(), states, config.initial.clone()) {
            Ok(definition) => Some(definition),
            Err(FsmDefinitionError::NoStates) => {
                self.reject(ConfigError::Empty {
                    kind: "fsm",
                    name: config.name.clone(),
                });
                None
            }
            Err(FsmDefinitionError::UnknownInitial(initial)) => {
                self.reject(ConfigError::MissingReference {
                    kind: "fsm",
                    name: config.name.clone(),
                    referenced_kind: "initial state",
                    referenced: initial,
                });
                None
            }
            Err(FsmDefinitionError::UnknownTarget { from, event, target }) => {
                self.reject(ConfigError::MissingReference {
                    kind: "transition",
                    name: format!("{}/{from}/{event}", config.name),
                    referenced_kind: "state",
                    referenced: target,
                });
                None
            }
        }
    }

    /// Keep only action names that refer to declared events.
    fn action_list(
        &mut self,
        owner: &str,
        actions: &[String],
        events: &HashMap<String, Arc<Event>>,
    ) -> Vec<String> {
        actions
            .iter()
            .filter(|action| {
                let known = events.contains_key(action.as_str());
                if !known {
                    self.reject(ConfigError::MissingReference {
                        kind: "action",
                        name: owner.to_string(),
                        referenced_kind: "event",
                        referenced: (*action).clone(),
                    });
                }
                known
            })
            .cloned()
            .collect()
    }

    fn flows(&mut self, configs: &[FlowConfig]) -> HashMap<String, Arc<Flow>> {
        let mut flows = HashMap::new();
        for config in configs {
            if flows.contains_key(&config.name) {
                self.reject(ConfigError::Duplicate {
                    kind: "flow",
                    name: config.name.clone(),
                });
                continue;
            }
            match flow_from_spec(&config.name, &config.spec) {
                Ok(flow) => {
                    flows.insert(config.name.clone(), Arc::new(flow));
                }
                Err(e) => self.reject(e),
            }
        }
        flows
    }

    fn ports(
        &mut self,
        configs: &[PortConfig],
        fsms: &BTreeMap<String, FsmDefinition>,
        flows: &HashMap<String, Arc<Flow>>,
    ) -> BTreeMap<String, Arc<Port>> {
        let mut ports = BTreeMap::new();
        for config in configs {
            if ports.contains_key(&config.name) {
                self.reject(ConfigError::Duplicate {
                    kind: "port",
                    name: config.name.clone(),
                });
                continue;
            }
            let port = match config.role {
                PortRoleConfig::Server => self.server_port(config),
                PortRoleConfig::Client => self.client_port(config, fsms, flows),
            };
            if let Some(port) = port {
                ports.insert(config.name.clone(), Arc::new(port));
            }
        }
        ports
    }

    fn server_port(&mut self, config: &PortConfig) -> Option<Port> {
        let Some(local) = &config.local else {
            self.reject(ConfigError::MissingField {
                kind: "port",
                name: config.name.clone(),
                field: "local",
            });
            return None;
        };
        let local = self.socket_addr(&config.name, local, Some(DEFAULT_SERVER_IP))?;
        Some(Port::server(config.name.clone(), transport(config.transport), local))
    }

    fn client_port(
        &mut self,
        config: &PortConfig,
        fsms: &BTreeMap<String, FsmDefinition>,
        flows: &HashMap<String, Arc<Flow>>,
    ) -> Option<Port> {
        let Some(remote) = &config.remote else {
            self.reject(ConfigError::MissingField {
                kind: "port",
                name: config.name.clone(),
                field: "remote",
            });
            return None;
        };
        let remote = self.socket_addr(&config.name, remote, None)?;

        let Some(fsm_name) = &config.fsm else {
            self.reject(ConfigError::MissingField {
                kind: "port",
                name: config.name.clone(),
                field: "fsm",
            });
            return None;
        };
        let Some(fsm) = fsms.get(fsm_name) else {
            self.reject(ConfigError::MissingReference {
                kind: "port",
                name: config.name.clone(),
                referenced_kind: "fsm",
                referenced: fsm_name.clone(),
            });
            return None;
        };

        let mut state_flows = HashMap::new();
        for mapping in &config.flows {
            let entry = format!("{}/{}", config.name, mapping.state);
            if state_flows.contains_key(&mapping.state) {
                self.reject(ConfigError::Duplicate {
                    kind: "state flow",
                    name: entry,
                });
                continue;
            }
            if !fsm.has_state(&mapping.state) {
                self.reject(ConfigError::MissingReference {
                    kind: "state flow",
                    name: entry,
                    referenced_kind: "state",
                    referenced: mapping.state.clone(),
                });
                continue;
            }

            let flow = match &mapping.flow {
                FlowRef::Named(name) => match flows.get(name) {
                    Some(flow) => Arc::clone(flow),
                    None => {
                        self.reject(ConfigError::MissingReference {
                            kind: "state flow",
                            name: entry,
                            referenced_kind: "flow",
                            referenced: name.clone(),
                        });
                        continue;
                    }
                },
                FlowRef::Inline(spec) => {
                    self.anonymous_flows += 1;
                    let name = format!("Anonymous Flow {}", self.anonymous_flows);
                    match flow_from_spec(&name, spec) {
                        Ok(flow) => Arc::new(flow),
                        Err(e) => {
                            self.reject(e);
                            continue;
                        }
                    }
                }
            };
            state_flows.insert(mapping.state.clone(), flow);
        }

        if state_flows.is_empty() {
            self.reject(ConfigError::Empty {
                kind: "port flows",
                name: config.name.clone(),
            });
            return None;
        }

        let endpoint = ClientEndpoint::new(remote, fsm_name.clone(), state_flows);
        Some(Port::client(
            config.name.clone(),
            transport(config.transport),
            CLIENT_LOCAL,
            endpoint,
        ))
    }

    fn socket_addr(
        &mut self,
        port: &str,
        endpoint: &EndpointConfig,
        default_ip: Option<IpAddr>,
    ) -> Option<SocketAddr> {
        let ip = match (endpoint.ip.as_deref().filter(|ip| !ip.is_empty()), default_ip) {
            (Some(ip), _) => ip.parse::<IpAddr>().ok(),
            (None, default) => default,
        };
        match ip {
            Some(ip) => Some(SocketAddr::new(ip, endpoint.port)),
            None => {
                self.reject(ConfigError::InvalidAddress {
                    name: port.to_string(),
                    address: format!("{}:{}", endpoint.ip.as_deref().unwrap_or(""), endpoint.port),
                });
                None
            }
        }
    }
}

fn transport(config: TransportConfig) -> Transport {
    match config {
        TransportConfig::Tcp => Transport::Tcp,
        TransportConfig::Udp => Transport::Udp,
    }
}

fn event_from_config(config: &EventConfig) -> Result<Event, ConfigError> {
    let topic = || {
        config
            .topic
            .clone()
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                kind: "event",
                name: config.name.clone(),
                field: "topic",
            })
    };

    let kind = match config.kind {
        EventKindConfig::Environment => EventKind::Environment { topic: topic()? },
        EventKindConfig::Input => EventKind::Input { topic: topic()? },
        EventKindConfig::Output => EventKind::Output { topic: topic()? },
        EventKindConfig::InputOutput => EventKind::InputOutput { topic: topic()? },
        EventKindConfig::LocalTimer => {
            let timeout = config.timeout.as_deref().ok_or_else(|| ConfigError::MissingField {
                kind: "event",
                name: config.name.clone(),
                field: "timeout",
            })?;
            let ms = parse_duration_ms(timeout).map_err(|source| ConfigError::InvalidDuration {
                kind: "event",
                name: config.name.clone(),
                source,
            })?;
            let timeout = Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| {
                ConfigError::InvalidDuration {
                    kind: "event",
                    name: config.name.clone(),
                    source: DurationError::InvalidNumber(timeout.to_string()),
                }
            })?;
            EventKind::LocalTimer { timeout }
        }
    };

    Ok(Event::new(config.name.clone(), kind))
}

fn flow_from_spec(name: &str, spec: &FlowSpec) -> Result<Flow, ConfigError> {
    let duration = |field: &'static str, value: Option<&str>| -> Result<f64, ConfigError> {
        let value = value.ok_or_else(|| ConfigError::MissingField {
            kind: "flow",
            name: name.to_string(),
            field,
        })?;
        parse_duration_ms(value).map_err(|source| ConfigError::InvalidDuration {
            kind: "flow",
            name: name.to_string(),
            source,
        })
    };

    let interval = duration("interval", Some(&spec.interval))?;
    let flow = match spec.kind {
        FlowKindConfig::Simple => Flow::simple(name, spec.buffer_size, interval),
        FlowKindConfig::OnOff => {
            let on = duration("on", spec.on.as_deref())?;
            let off = duration("off", spec.off.as_deref())?;
            Flow::on_off(name, spec.buffer_size, interval, on, off)
        }
    };

    flow.map_err(|e: FlowError| ConfigError::InvalidFlow {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StateConfig, StateFlowConfig, TransitionConfig};

    fn event(name: &str, kind: EventKindConfig, topic: Option<&str>, timeout: Option<&str>) -> EventConfig {
        EventConfig {
            name: name.to_string(),
            kind,
            topic: topic.map(str::to_string),
            timeout: timeout.map(str::to_string),
        }
    }

    fn simple_spec(buffer_size: f64, interval: &str) -> FlowSpec {
        FlowSpec {
            kind: FlowKindConfig::Simple,
            buffer_size,
            interval: interval.to_string(),
            on: None,
            off: None,
        }
    }

    fn base_config() -> ComponentConfig {
        ComponentConfig::builder()
            .name("c1")
            .pid(42)
            .events(vec![
                event("e1", EventKindConfig::Input, Some("t/e1"), None),
                event("a1", EventKindConfig::Output, Some("t/a1"), None),
                event("tick", EventKindConfig::LocalTimer, None, Some("200ms")),
            ])
            .fsms(vec![
                FsmConfig::builder()
                    .name("m1")
                    .initial("s1")
                    .states(vec![
                        StateConfig::builder()
                            .name("s1")
                            .transitions(vec![
                                TransitionConfig::builder()
                                    .event("e1")
                                    .target("s2")
                                    .actions(vec!["a1".to_string()])
                                    .build(),
                            ])
                            .build(),
                        StateConfig::builder().name("s2").build(),
                    ])
                    .build(),
            ])
            .flows(vec![FlowConfig {
                name: "f1".to_string(),
                spec: simple_spec(64.0, "10ms"),
            }])
            .ports(vec![
                PortConfig::builder()
                    .name("srv")
                    .role(PortRoleConfig::Server)
                    .transport(TransportConfig::Udp)
                    .local(EndpointConfig { ip: None, port: 9000 })
                    .build(),
                PortConfig::builder()
                    .name("cli")
                    .role(PortRoleConfig::Client)
                    .transport(TransportConfig::Tcp)
                    .remote(EndpointConfig {
                        ip: Some("127.0.0.1".to_string()),
                        port: 9001,
                    })
                    .fsm("m1".to_string())
                    .flows(vec![
                        StateFlowConfig::builder()
                            .state("s1")
                            .flow(FlowRef::Named("f1".to_string()))
                            .build(),
                        StateFlowConfig::builder()
                            .state("s2")
                            .flow(FlowRef::Inline(simple_spec(32.0, "1s")))
                            .build(),
                    ])
                    .build(),
            ])
            .build()
    }

    #[test]
    fn test_valid_config_builds_everything() {
        let (model, errors) = ComponentModel::from_config(&base_config());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");

        assert_eq!(model.events.len(), 3);
        assert_eq!(
            model.events["tick"].kind(),
            &EventKind::LocalTimer {
                timeout: Duration::from_millis(200)
            }
        );
        assert_eq!(model.fsms["m1"].initial(), "s1");

        let server = &model.ports["srv"];
        assert_eq!(server.local(), "127.0.0.1:9000".parse().unwrap());
        assert!(server.endpoint().is_none());

        let client = &model.ports["cli"];
        let endpoint = client.endpoint().unwrap();
        assert_eq!(client.local(), CLIENT_LOCAL);
        assert!(Arc::ptr_eq(endpoint.flow_for("s1").unwrap(), &model.flows["f1"]));
        assert_eq!(endpoint.flow_for("s2").unwrap().name(), "Anonymous Flow 1");
    }

    #[test]
    fn test_duplicate_event_keeps_first() {
        let mut config = base_config();
        config
            .events
            .push(event("e1", EventKindConfig::Output, Some("other"), None));

        let (model, errors) = ComponentModel::from_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ConfigError::Duplicate { kind: "event", .. }));
        assert_eq!(model.events["e1"].kind().topic(), Some("t/e1"));
    }

    #[test]
    fn test_event_without_unit_is_rejected() {
        let mut config = base_config();
        config.events[2].timeout = Some("200".to_string());

        let (model, errors) = ComponentModel::from_config(&config);
        assert!(!model.events.contains_key("tick"));
        assert!(matches!(&errors[0], ConfigError::InvalidDuration { .. }));
    }

    #[test]
    fn test_on_off_flow_ordering_is_rejected() {
        let mut config = base_config();
        config.flows.push(FlowConfig {
            name: "bad".to_string(),
            spec: FlowSpec {
                kind: FlowKindConfig::OnOff,
                buffer_size: 64.0,
                interval: "50ms".to_string(),
                on: Some("10ms".to_string()),
                off: Some("10ms".to_string()),
            },
        });

        let (model, errors) = ComponentModel::from_config(&config);
        assert!(!model.flows.contains_key("bad"));
        assert!(model.flows.contains_key("f1"));
        assert!(matches!(&errors[0], ConfigError::InvalidFlow { .. }));
    }

    #[test]
    fn test_transition_to_unknown_state_is_dropped() {
        let mut config = base_config();
        config.fsms[0].states[1].transitions.push(
            TransitionConfig::builder()
                .event("e1")
                .target("ghost")
                .build(),
        );

        let (model, errors) = ComponentModel::from_config(&config);
        assert_eq!(errors.len(), 1);
        let fsm = &model.fsms["m1"];
        assert!(fsm.state("s2").unwrap().transition("e1").is_none());
        assert!(fsm.state("s1").unwrap().transition("e1").is_some());
    }

    #[test]
    fn test_unknown_initial_rejects_fsm_and_dependent_port() {
        let mut config = base_config();
        config.fsms[0].initial = "nowhere".to_string();

        let (model, errors) = ComponentModel::from_config(&config);
        assert!(model.fsms.is_empty());
        assert!(!model.ports.contains_key("cli"));
        assert!(model.ports.contains_key("srv"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_client_port_with_no_valid_mapping_is_rejected() {
        let mut config = base_config();
        config.ports[1].flows = vec![
            StateFlowConfig::builder()
                .state("s9")
                .flow(FlowRef::Named("f1".to_string()))
                .build(),
            StateFlowConfig::builder()
                .state("s1")
                .flow(FlowRef::Named("missing".to_string()))
                .build(),
        ];

        let (model, errors) = ComponentModel::from_config(&config);
        assert!(!model.ports.contains_key("cli"));
        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[2], ConfigError::Empty { kind: "port flows", .. }));
    }

    #[test]
    fn test_unknown_action_is_dropped() {
        let mut config = base_config();
        config.fsms[0].states[0].on_exit = vec!["a1".to_string(), "nope".to_string()];

        let (model, errors) = ComponentModel::from_config(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(model.fsms["m1"].state("s1").unwrap().on_exit(), ["a1".to_string()]);
    }
}
