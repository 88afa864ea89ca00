//! Interrupt flag management for the current hart: on/off/get plus the
//! `push_off`/`pop_off` nesting that every spinlock acquisition goes through.
//!
//! The flag lives in the hart's [`PerCpuData`](crate::percpu::PerCpuData),
//! so it follows the hart across context switches exactly like the hardware
//! bit would.

use crate::percpu::get_percpu_data;

/// Enable interrupts on this hart.
#[inline(always)]
pub fn enable_interrupts() {
    get_percpu_data().set_irq_enabled(true);
}

/// Disable interrupts on this hart.
#[inline(always)]
pub fn disable_interrupts() {
    get_percpu_data().set_irq_enabled(false);
}

/// Returns true if interrupts are currently enabled on this hart.
#[inline(always)]
pub fn are_interrupts_enabled() -> bool {
    get_percpu_data().irq_enabled()
}

/// Disable interrupts, remembering whether they were on if this is the
/// outermost region. Matched by [`pop_off`]; regions nest.
pub fn push_off() {
    let old = are_interrupts_enabled();
    disable_interrupts();
    let cpu = get_percpu_data();
    let depth = cpu.noff();
    if depth == 0 {
        cpu.set_intena(old);
    }
    cpu.set_noff(depth + 1);
}

/// Leave one `push_off` region. Interrupts come back on only when the
/// outermost region closes and they were on when it opened.
pub fn pop_off() {
    let cpu = get_percpu_data();
    if are_interrupts_enabled() {
        panic!("pop_off - interruptible");
    }
    let depth = cpu.noff();
    if depth < 1 {
        panic!("pop_off");
    }
    cpu.set_noff(depth - 1);
    if depth == 1 && cpu.intena() {
        enable_interrupts();
    }
}

/// RAII `push_off`/`pop_off` pair.
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqOffGuard {
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl IrqOffGuard {
    #[inline]
    pub fn new() -> Self {
        push_off();
        Self {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Default for IrqOffGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqOffGuard {
    #[inline]
    fn drop(&mut self) {
        pop_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn nested_regions_restore_only_at_depth_zero() {
        thread::spawn(|| {
            enable_interrupts();
            push_off();
            push_off();
            assert!(!are_interrupts_enabled());
            pop_off();
            assert!(!are_interrupts_enabled(), "inner pop must not re-enable");
            pop_off();
            assert!(are_interrupts_enabled());
            assert_eq!(get_percpu_data().noff(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn disabled_state_is_preserved() {
        thread::spawn(|| {
            disable_interrupts();
            {
                let _outer = IrqOffGuard::new();
                let _inner = IrqOffGuard::new();
            }
            assert!(!are_interrupts_enabled());
        })
        .join()
        .unwrap();
    }

    #[test]
    #[should_panic(expected = "pop_off")]
    fn unbalanced_pop_panics() {
        disable_interrupts();
        pop_off();
    }

    #[test]
    #[should_panic(expected = "pop_off - interruptible")]
    fn pop_with_interrupts_on_panics() {
        push_off();
        enable_interrupts();
        pop_off();
    }
}
