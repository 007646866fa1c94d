//! Per-tick traffic decisions for one client port.
//!
//! The shaper decides what a tick should do (payload value, whether the duty cycle is on, how long
//! to wait) from the active [`Flow`], the tick instant and a seed. Socket work stays with the port
//! task that drives it.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::StateMachine;
use super::wrappers::input::{SystemInput, SystemResource};
use crate::model::{Flow, FlowShape};

/// Seed material for the payload generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed(pub u64);

impl SystemResource for Seed {
    fn generate() -> Self {
        Seed(rand::random())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duty {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    /// Payload value in `[0, buffer_size]`.
    pub value: usize,
    pub duty: Duty,
    pub interval: Duration,
}

pub type ShaperInput = SystemInput<Flow, (Instant, Seed)>;

#[derive(Debug)]
struct ActiveFlow {
    flow: Flow,
    cycle_start: Instant,
    rng: StdRng,
}

#[derive(Debug, Default)]
pub struct FlowShaper {
    staged: Option<Flow>,
    active: Option<ActiveFlow>,
    pending: Option<TickPlan>,
}

impl FlowShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flow in effect, once a tick has activated it.
    pub fn active_flow(&self) -> Option<&Flow> {
        self.active.as_ref().map(|active| &active.flow)
    }

    fn stage(&mut self, flow: Flow) {
        self.staged = Some(flow);
    }

    fn tick(&mut self, now: Instant, seed: Seed) {
        if let Some(flow) = self.staged.take() {
            self.active = Some(ActiveFlow {
                flow,
                cycle_start: now,
                rng: StdRng::seed_from_u64(seed.0),
            });
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };

        // Drawn on every tick, including while the duty cycle is off.
        let value = active.rng.random_range(0..=active.flow.buffer_size());
        let duty = duty_at(
            active.flow.shape(),
            now.saturating_duration_since(active.cycle_start),
        );

        self.pending = Some(TickPlan {
            value,
            duty,
            interval: active.flow.interval(),
        });
    }
}

/// Duty state `elapsed` after the cycle start.
///
/// On for `[k*P, k*P + on)` and off for `[k*P + on, (k+1)*P)` where `P = on + off`.
pub fn duty_at(shape: FlowShape, elapsed: Duration) -> Duty {
    match shape {
        FlowShape::Simple => Duty::On,
        FlowShape::OnOff { on, off } => {
            let period = (on + off).as_nanos();
            if period == 0 {
                return Duty::On;
            }
            if elapsed.as_nanos() % period < on.as_nanos() {
                Duty::On
            } else {
                Duty::Off
            }
        }
    }
}

impl StateMachine for FlowShaper {
    type Input = ShaperInput;
    type Output = TickPlan;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            SystemInput::Input(flow) => self.stage(flow),
            SystemInput::System((now, seed)) => self.tick(now, seed),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.take()
    }
}
