//! Building, running and stopping a set of components.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::bus::{BusBackend, BusOptions, LastWill};
use crate::component::Component;
use crate::component_map::component_ref::ComponentRef;
use crate::component_map::component_ref::error::ComponentViewInvalid;
use crate::component_map::error::ComponentNotFound;
use crate::component_map::{ComponentId, ComponentMap};
use crate::config::ComponentConfig;
use crate::model::ComponentModel;
use crate::shutdown::Termination;
use crate::trace::TraceLog;

#[derive(Debug, thiserror::Error)]
pub enum EmulationError {
    #[error("no component could be started")]
    NoComponents,

    #[error(transparent)]
    NotFound(#[from] ComponentNotFound),

    #[error(transparent)]
    ViewInvalid(#[from] ComponentViewInvalid),
}

/// Every running component, the shared termination handle and the trace they write to.
#[derive(Debug)]
pub struct Emulation {
    components: ComponentMap<Component>,
    termination: Termination,
    trace: Arc<TraceLog>,
}

impl Emulation {
    /// Build, connect and start every component in `configs`.
    ///
    /// A component whose bus connection fails, or whose name is already taken, is skipped.
    /// Starting nothing at all is an error.
    pub async fn launch(
        configs: Vec<ComponentConfig>,
        backend: BusBackend,
        start_at: Instant,
    ) -> Result<Self, EmulationError> {
        let emulation = Self {
            components: ComponentMap::new(),
            termination: Termination::new(),
            trace: Arc::new(TraceLog::new()),
        };

        for config in configs {
            let id = ComponentId::from(config.name.as_str());
            if emulation.components.contains(&id) {
                warn!(component = %id, "Duplicate component name, skipping");
                continue;
            }

            let (model, errors) = ComponentModel::from_config(&config);
            if !errors.is_empty() {
                warn!(component = %id, rejected = errors.len(), "Component loaded with rejected objects");
            }

            let options = BusOptions::builder()
                .client_id(model.name.clone())
                .address(model.bus_address.clone())
                .will(LastWill::connection_lost(model.pid))
                .build();
            let connection = match backend.connect(options).await {
                Ok(connection) => connection,
                Err(e) => {
                    error!(component = %id, error = %e, "Bus connection failed, component not started");
                    continue;
                }
            };

            let component = Component::new(
                model,
                connection,
                emulation.termination.clone(),
                Arc::clone(&emulation.trace),
            );
            if let Err(e) = emulation.components.insert(id, Arc::clone(&component)) {
                warn!(error = %e, "Component not registered");
                component.bus().disconnect();
                continue;
            }
            component.start(start_at).await;
        }

        if emulation.components.is_empty() {
            return Err(EmulationError::NoComponents);
        }
        info!(components = emulation.components.len(), "Emulation launched");
        Ok(emulation)
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    pub fn trace(&self) -> &Arc<TraceLog> {
        &self.trace
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.ids()
    }

    pub fn component(&self, id: &ComponentId) -> Result<ComponentRef<Component>, ComponentNotFound> {
        self.components.get(id)
    }

    /// Feed `event` into a running component, as if it had arrived from the bus.
    pub async fn inject(&self, id: &ComponentId, event: &str) -> Result<(), EmulationError> {
        let handling = self
            .components
            .get(id)?
            .view(|component| component.receive_event(event.to_string()))?;
        handling.await;
        Ok(())
    }

    /// Terminate every task, leave the bus and close any trace span still open.
    pub async fn shutdown(self) {
        info!("Shutting down emulation");
        self.termination.cancel();

        for id in self.components.ids() {
            if let Ok(component) = self.components.remove(&id) {
                component.stop().await;
            }
        }

        self.trace.close_open_spans();
        info!(records = self.trace.len(), "Emulation stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::MemoryBroker;
    use crate::config::parse_component;
    use crate::trace::{CAT_STATE, Phase};

    const SENSOR: &str = r#"
        name = "sensor"
        pid = 101

        [[events]]
        name = "go"
        kind = "e"
        topic = "sensor/go"

        [[events]]
        name = "ready"
        kind = "o"
        topic = "sensor/ready"

        [[fsms]]
        name = "m1"
        initial = "idle"

        [[fsms.states]]
        name = "idle"
        transitions = [{ event = "go", target = "busy", actions = ["ready"] }]

        [[fsms.states]]
        name = "busy"
    "#;

    const SINK: &str = r#"
        name = "sink"
        pid = 102

        [[events]]
        name = "ready"
        kind = "i"
        topic = "sensor/ready"

        [[fsms]]
        name = "m1"
        initial = "waiting"

        [[fsms.states]]
        name = "waiting"
        transitions = [{ event = "ready", target = "done" }]

        [[fsms.states]]
        name = "done"
    "#;

    fn configs() -> Vec<ComponentConfig> {
        vec![parse_component(SENSOR).unwrap(), parse_component(SINK).unwrap()]
    }

    fn state(emulation: &Emulation, component: &str) -> String {
        emulation
            .component(&ComponentId::from(component))
            .unwrap()
            .view(|c| c.current_state("m1").unwrap().to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_inject_propagates_over_bus() {
        let backend = BusBackend::Memory(MemoryBroker::new());
        let emulation = Emulation::launch(configs(), backend, Instant::now()).await.unwrap();
        assert_eq!(emulation.component_ids().len(), 2);

        // Let the dispatchers come up before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        emulation.inject(&ComponentId::from("sensor"), "go").await.unwrap();
        assert_eq!(state(&emulation, "sensor"), "busy");

        tokio::time::timeout(Duration::from_secs(1), async {
            while state(&emulation, "sink") != "done" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink should react to sensor");

        let trace = Arc::clone(emulation.trace());
        emulation.shutdown().await;
        assert!(
            trace
                .with_category(CAT_STATE)
                .iter()
                .all(|record| record.phase == Phase::Begin && record.end.is_some())
        );
    }

    #[tokio::test]
    async fn test_duplicate_names_start_once() {
        let broker = MemoryBroker::new();
        let mut configs = configs();
        configs.push(parse_component(SENSOR).unwrap());

        let emulation = Emulation::launch(configs, BusBackend::Memory(broker.clone()), Instant::now())
            .await
            .unwrap();
        assert_eq!(emulation.component_ids().len(), 2);

        emulation.shutdown().await;
        assert!(!broker.is_connected("sensor"));
    }

    #[tokio::test]
    async fn test_nothing_to_launch_is_fatal() {
        let backend = BusBackend::Memory(MemoryBroker::new());
        let result = Emulation::launch(Vec::new(), backend, Instant::now()).await;
        assert!(matches!(result, Err(EmulationError::NoComponents)));
    }

    #[tokio::test]
    async fn test_inject_unknown_component() {
        let backend = BusBackend::Memory(MemoryBroker::new());
        let emulation = Emulation::launch(configs(), backend, Instant::now()).await.unwrap();

        let result = emulation.inject(&ComponentId::from("ghost"), "go").await;
        assert!(matches!(result, Err(EmulationError::NotFound(_))));
        emulation.shutdown().await;
    }
}
