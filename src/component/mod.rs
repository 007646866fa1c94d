//! A running component: its FSMs, ports, bus connection and tasks.

mod bridge;
pub mod fsm;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use self::fsm::Fsm;
use crate::bus::{BusConnection, BusMessage, MessageBus};
use crate::component_id::ComponentId;
use crate::model::{ComponentModel, Event, EventKind, Port, PortRole};
use crate::port::client::run_client;
use crate::port::{BoundServer, PortContext};
use crate::shutdown::{TaskGroup, Termination};
use crate::trace::{CAT_APP_EVENT_SND, CAT_LOCAL_EVENT_RCV, CAT_LOCAL_EVENT_SND, TraceLog};

pub struct Component {
    id: ComponentId,
    pid: u32,
    events: HashMap<String, Arc<Event>>,
    /// Inbound events by bus topic.
    topics: HashMap<String, Arc<Event>>,
    fsms: BTreeMap<String, Arc<Fsm>>,
    ports: BTreeMap<String, Arc<Port>>,
    bus: Arc<dyn MessageBus>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
    termination: Termination,
    tasks: TaskGroup,
    trace: Arc<TraceLog>,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("fsms", &self.fsms.keys().collect::<Vec<_>>())
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Component {
    pub fn new(
        model: ComponentModel,
        connection: BusConnection,
        termination: Termination,
        trace: Arc<TraceLog>,
    ) -> Arc<Self> {
        let topics = model
            .events
            .values()
            .filter(|event| event.kind().is_inbound())
            .filter_map(|event| {
                event
                    .kind()
                    .topic()
                    .map(|topic| (topic.to_string(), Arc::clone(event)))
            })
            .collect();

        let fsms = model
            .fsms
            .into_iter()
            .map(|(name, definition)| {
                let fsm = Fsm::new(definition, model.pid, Arc::clone(&trace));
                (name, Arc::new(fsm))
            })
            .collect();

        Arc::new(Self {
            id: ComponentId::from(model.name),
            pid: model.pid,
            events: model.events,
            topics,
            fsms,
            ports: model.ports,
            bus: connection.bus,
            inbound: Mutex::new(Some(connection.inbound)),
            termination,
            tasks: TaskGroup::new(),
            trace,
        })
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn fsm(&self, name: &str) -> Option<&Arc<Fsm>> {
        self.fsms.get(name)
    }

    pub fn current_state(&self, fsm: &str) -> Option<Arc<str>> {
        self.fsms.get(fsm).map(|fsm| fsm.current_state())
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    fn port_context(&self) -> PortContext {
        PortContext {
            component: self.id.clone(),
            pid: self.pid,
            trace: Arc::clone(&self.trace),
            termination: self.termination.clone(),
        }
    }

    /// Offer `event` to every FSM in name order.
    ///
    /// FSMs without a transition for `event` in their current state are left untouched.
    pub fn receive_event(self: &Arc<Self>, event: String) -> BoxFuture<'static, ()> {
        let component = Arc::clone(self);
        async move {
            for fsm in component.fsms.values() {
                fsm.handle_event(&component, &event).await;
            }
        }
        .boxed()
    }

    /// Dispatch each action concurrently and wait for all of them.
    async fn run_actions(self: &Arc<Self>, actions: &[String]) {
        join_all(actions.iter().map(|action| self.handle_event_action(action))).await;
    }

    /// Perform the side effect of dispatching `action` as an action.
    pub async fn handle_event_action(self: &Arc<Self>, action: &str) {
        let Some(event) = self.events.get(action) else {
            warn!(component = %self.id, action, "Unknown action");
            return;
        };

        match event.kind() {
            EventKind::Output { topic } | EventKind::InputOutput { topic } => {
                self.trace
                    .instant(event.name(), self.pid, CAT_APP_EVENT_SND, vec![topic.clone()]);
                if let Err(e) = self.bus.publish(topic, Bytes::from(event.name().to_string())) {
                    error!(component = %self.id, event = %event.name(), topic, error = %e, "Publish failed");
                }
            }
            EventKind::LocalTimer { timeout } => {
                self.trace.instant(
                    event.name(),
                    self.pid,
                    CAT_LOCAL_EVENT_SND,
                    vec![format!("{}ms", timeout.as_millis())],
                );
                self.arm_timer(event.name().to_string(), *timeout);
            }
            EventKind::Environment { .. } | EventKind::Input { .. } => {
                debug!(component = %self.id, action, "Inbound-only event used as action, ignored");
            }
        }
    }

    /// Feed `event` back into this component after `timeout`, unless terminated first.
    fn arm_timer(self: &Arc<Self>, event: String, timeout: Duration) {
        let component = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = component.termination.cancelled() => {
                    debug!(component = %component.id, event = %event, "Timer abandoned");
                }
                _ = tokio::time::sleep(timeout) => {
                    component
                        .trace
                        .instant(&event, component.pid, CAT_LOCAL_EVENT_RCV, vec![]);
                    component.receive_event(event).await;
                }
            }
        });
    }

    /// Bring the component up.
    ///
    /// Bus topics are subscribed and server ports started right away. Inbound dispatch and client
    /// ports wait until `start_at`, and are abandoned if termination comes first.
    pub async fn start(self: &Arc<Self>, start_at: Instant) {
        let subscribed = self.subscribe_events();
        info!(component = %self.id, pid = self.pid, subscribed, "Starting component");

        for port in self.ports.values() {
            if matches!(port.role(), PortRole::Server) {
                self.start_server(Arc::clone(port)).await;
            }
        }

        let component = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = component.termination.cancelled() => {
                    info!(component = %component.id, "Terminated before start time");
                    return;
                }
                _ = tokio::time::sleep_until(start_at) => {}
            }

            component.spawn_dispatch();
            for port in component.ports.values() {
                if matches!(port.role(), PortRole::Client(_)) {
                    component.start_client(Arc::clone(port));
                }
            }
            info!(component = %component.id, "Component running");
        });
    }

    async fn start_server(&self, port: Arc<Port>) {
        match BoundServer::bind(port).await {
            Ok(server) => {
                self.tasks.spawn(server.serve(self.port_context()));
            }
            Err(e) => error!(component = %self.id, error = %e, "Server port not started"),
        }
    }

    fn start_client(&self, port: Arc<Port>) {
        let Some(endpoint) = port.endpoint() else {
            return;
        };
        let Some(fsm) = self.fsms.get(endpoint.fsm()) else {
            error!(component = %self.id, port = %port.name(), fsm = %endpoint.fsm(), "Controlling fsm missing");
            return;
        };

        let fsm_name = fsm.name().to_string();
        let state_rx = fsm.watch_state();
        let ctx = self.port_context();
        self.tasks.spawn(async move {
            // Failures are logged by the generator itself.
            let _ = run_client(port, fsm_name, state_rx, ctx).await;
        });
    }

    /// Leave the bus cleanly and wait for every task of this component.
    ///
    /// Tasks only finish once the shared [`Termination`] has been cancelled.
    pub async fn stop(&self) {
        self.bus.disconnect();
        self.tasks.drain().await;
        info!(component = %self.id, "Component stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusOptions, LastWill, MemoryBroker, QoS, WILL_TOPIC};
    use crate::config::{
        ComponentConfig, EventConfig, EventKindConfig, FsmConfig, StateConfig, TransitionConfig,
    };
    use crate::trace::{CAT_ENV_EVENT_RCV, CAT_STATE, Phase};

    fn event(name: &str, kind: EventKindConfig, topic: Option<&str>, timeout: Option<&str>) -> EventConfig {
        EventConfig {
            name: name.to_string(),
            kind,
            topic: topic.map(str::to_string),
            timeout: timeout.map(str::to_string),
        }
    }

    fn transition(event: &str, target: &str, actions: &[&str]) -> TransitionConfig {
        TransitionConfig::builder()
            .event(event)
            .target(target)
            .actions(actions.iter().map(|a| a.to_string()).collect())
            .build()
    }

    /// m1: s1 --e1/[a1]--> s2 --back--> s1, leaving s1 emits x1 and entering s2 emits n1.
    /// m2: idle --e1--> busy.
    fn config() -> ComponentConfig {
        ComponentConfig::builder()
            .name("c1")
            .pid(11)
            .events(vec![
                event("e1", EventKindConfig::Environment, Some("env/e1"), None),
                event("a1", EventKindConfig::Output, Some("out/a1"), None),
                event("x1", EventKindConfig::Output, Some("out/x1"), None),
                event("n1", EventKindConfig::Output, Some("out/n1"), None),
                event("back", EventKindConfig::Input, Some("in/back"), None),
                event("e_timer", EventKindConfig::LocalTimer, None, Some("200ms")),
                event("fast", EventKindConfig::LocalTimer, None, Some("20ms")),
            ])
            .fsms(vec![
                FsmConfig::builder()
                    .name("m1")
                    .initial("s1")
                    .states(vec![
                        StateConfig::builder()
                            .name("s1")
                            .on_exit(vec!["x1".to_string()])
                            .transitions(vec![
                                transition("e1", "s2", &["a1"]),
                                transition("arm", "s1", &["e_timer"]),
                                transition("arm_fast", "s1", &["fast"]),
                                transition("fast", "s2", &[]),
                                transition("e_timer", "s2", &[]),
                            ])
                            .build(),
                        StateConfig::builder()
                            .name("s2")
                            .on_entry(vec!["n1".to_string()])
                            .transitions(vec![transition("back", "s1", &[])])
                            .build(),
                    ])
                    .build(),
                FsmConfig::builder()
                    .name("m2")
                    .initial("idle")
                    .states(vec![
                        StateConfig::builder()
                            .name("idle")
                            .transitions(vec![transition("e1", "busy", &[])])
                            .build(),
                        StateConfig::builder().name("busy").build(),
                    ])
                    .build(),
            ])
            .build()
    }

    fn build(broker: &MemoryBroker, termination: &Termination) -> Arc<Component> {
        let (model, errors) = ComponentModel::from_config(&config());
        assert!(errors.is_empty(), "{errors:?}");
        let connection = broker
            .connect(
                BusOptions::builder()
                    .client_id("c1")
                    .address("memory")
                    .will(LastWill::connection_lost(11))
                    .build(),
            )
            .unwrap();
        Component::new(model, connection, termination.clone(), Arc::new(TraceLog::new()))
    }

    fn observer(broker: &MemoryBroker, topics: &[&str]) -> BusConnection {
        let connection = broker
            .connect(BusOptions::builder().client_id("observer").address("memory").build())
            .unwrap();
        for topic in topics {
            connection.bus.subscribe(topic, QoS::AtLeastOnce).unwrap();
        }
        connection
    }

    #[tokio::test]
    async fn test_transition_runs_exit_transition_entry_once_each() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);
        let mut observer = observer(&broker, &["out/x1", "out/a1", "out/n1"]);

        component.receive_event("e1".into()).await;

        assert_eq!(&*component.current_state("m1").unwrap(), "s2");
        assert_eq!(&*component.current_state("m2").unwrap(), "busy");

        let mut published = Vec::new();
        while let Ok(message) = observer.inbound.try_recv() {
            published.push(message.payload);
        }
        assert_eq!(
            published,
            vec![
                Bytes::from_static(b"x1"),
                Bytes::from_static(b"a1"),
                Bytes::from_static(b"n1"),
            ]
        );
        assert_eq!(component.trace.with_category(CAT_APP_EVENT_SND).len(), 3);

        let states: Vec<_> = component
            .trace
            .with_category(CAT_STATE)
            .into_iter()
            .filter(|record| record.name == "m1")
            .collect();
        assert_eq!(states.len(), 2);
        assert!(states[0].end.unwrap() <= states[1].ts);
    }

    #[tokio::test]
    async fn test_unmapped_event_changes_nothing() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);
        let before = component.trace.len();

        component.receive_event("back".into()).await;
        component.receive_event("nothing".into()).await;

        assert_eq!(&*component.current_state("m1").unwrap(), "s1");
        assert_eq!(&*component.current_state("m2").unwrap(), "idle");
        assert_eq!(component.trace.len(), before);
    }

    #[tokio::test]
    async fn test_departed_boundary_precedes_entered() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);

        component.receive_event("e1".into()).await;

        let states: Vec<_> = component
            .trace
            .with_category(CAT_STATE)
            .into_iter()
            .filter(|record| record.name == "m1")
            .collect();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].args, ["s1"]);
        assert_eq!(states[1].args, ["s2"]);
        assert!(states.iter().all(|record| record.phase == Phase::Begin));

        let departed = states[0].end.unwrap();
        assert!(departed <= states[1].ts);
        assert!(states[1].end.is_none());
    }

    #[tokio::test]
    async fn test_timer_abandoned_on_termination() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);

        component.receive_event("arm".into()).await;
        assert_eq!(component.tasks().len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        termination.cancel();
        component.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(component.trace.with_category(CAT_LOCAL_EVENT_RCV).is_empty());
        assert_eq!(&*component.current_state("m1").unwrap(), "s1");
    }

    #[tokio::test]
    async fn test_timer_fires_into_component() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);

        component.receive_event("arm_fast".into()).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while &*component.current_state("m1").unwrap() != "s2" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timer should fire");

        assert_eq!(component.trace.with_category(CAT_LOCAL_EVENT_SND).len(), 1);
        assert_eq!(component.trace.with_category(CAT_LOCAL_EVENT_RCV).len(), 1);
        termination.cancel();
        component.stop().await;
    }

    #[tokio::test]
    async fn test_bus_message_drives_fsm() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);
        component.start(Instant::now() + Duration::from_millis(20)).await;

        // Subscribed by now; delivery waits for the start time.
        assert_eq!(broker.publish("env/e1", Bytes::from_static(b"e1")), 1);
        assert_eq!(&*component.current_state("m1").unwrap(), "s1");

        tokio::time::timeout(Duration::from_secs(1), async {
            while &*component.current_state("m1").unwrap() != "s2" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bus event should be dispatched");

        let received = component.trace.with_category(CAT_ENV_EVENT_RCV);
        assert!(!received.is_empty());
        assert_eq!(received[0].args[0], "env/e1");

        termination.cancel();
        component.stop().await;
        assert!(component.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_stop_leaves_bus_cleanly() {
        let broker = MemoryBroker::new();
        let termination = Termination::new();
        let component = build(&broker, &termination);
        let mut watcher = observer(&broker, &[WILL_TOPIC]);

        termination.cancel();
        component.stop().await;

        assert!(!broker.is_connected("c1"));
        assert!(watcher.inbound.try_recv().is_err());
    }
}
