pub mod idle;
pub mod interrupts;

pub use idle::*;
pub use interrupts::*;
