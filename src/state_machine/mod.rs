pub mod fsm;
pub mod shaper;
pub mod wrappers;

/// A deterministic machine driven by explicit input and drained through polled output.
///
/// Implementors keep their logic free of anything that could make two runs with the same input
/// diverge. The async runtime around them owns sockets, timers, locks and tasks; the machine only
/// ever sees values handed to it through [`process_input`](StateMachine::process_input).
///
/// # Rules for implementors
/// - No interior mutability and no shared ownership. State changes only through `&mut self`.
/// - No IO of any kind, including reading the system clock or system entropy. When time or
///   randomness is needed it arrives as input, typically through
///   [`SystemInput`](wrappers::input::SystemInput).
/// - No threads, no async and no blocking. Every call returns promptly.
///
/// Logging through `tracing` is permitted as long as nothing in the machine depends on it.
///
/// # Driving a machine
/// The caller feeds one input and then polls until `None`:
///
/// ```ignore
/// machine.process_input(FsmInput::Event("e1".into()));
/// while let Some(FsmOutput::Transition(plan)) = machine.poll_output() {
///     run_plan(plan).await;
/// }
/// ```
pub trait StateMachine {
    /// Everything the machine can be told. Usually an enum.
    type Input;
    /// Everything the machine can report back. Usually an enum.
    type Output;

    /// Apply `input` to the machine.
    fn process_input(&mut self, input: Self::Input);

    /// Take the next pending output, if any.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
