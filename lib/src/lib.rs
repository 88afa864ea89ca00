//! Rivet kernel support library: interrupt nesting, per-hart data,
//! spinlocks, kernel logging, boot configuration and the service-table macro.

pub mod config;
pub mod cpu;
pub mod klog;
pub mod percpu;
pub mod ring_buffer;
pub mod service_macro;
pub mod spinlock;

#[doc(hidden)]
pub use paste;
#[doc(hidden)]
pub use spin;

pub use config::{BootConfig, config_from_cmdline};
pub use cpu::{IrqOffGuard, pop_off, push_off};
pub use klog::KlogLevel;
pub use percpu::{MAX_CPUS, PerCpuData, current_cpu_id, current_hart, get_percpu_data};
pub use ring_buffer::ByteRing;
pub use spinlock::{Spinlock, SpinlockGuard};
