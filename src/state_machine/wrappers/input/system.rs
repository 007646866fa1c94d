use std::time::Instant;

use impl_trait_for_tuples::impl_for_tuples;

/// A value the runtime can produce from the ambient system on demand, such as the current
/// instant or fresh entropy.
pub trait SystemResource {
    fn generate() -> Self;
}

#[impl_for_tuples(1, 12)]
impl SystemResource for Tuple {
    fn generate() -> Self {
        for_tuples!( ( #( Tuple::generate() ),* ) )
    }
}

impl SystemResource for Instant {
    fn generate() -> Self {
        Instant::now()
    }
}

/// Either domain input or a system reading for a machine that needs both.
#[derive(Debug)]
pub enum SystemInput<I, S> {
    Input(I),
    System(S),
}

impl<I, S: SystemResource> SystemInput<I, S> {
    /// Read the system resources now.
    pub fn system() -> Self {
        SystemInput::System(S::generate())
    }
}
