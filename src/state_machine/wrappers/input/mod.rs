mod system;

pub use self::system::{SystemInput, SystemResource};
