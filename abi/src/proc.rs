//! Process identity and lifecycle states.

use core::fmt;

use crate::param::MAX_PROCS;

// --- ProcState ---

/// Lifecycle state of a process table slot.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProcState {
    /// Free slot.
    #[default]
    Unused = 0,
    /// Allocated, not yet runnable.
    Used = 1,
    /// Blocked on a wait channel.
    Sleeping = 2,
    /// Eligible for scheduling.
    Runnable = 3,
    /// Executing on some hart.
    Running = 4,
    /// Exited, waiting for the parent to collect the status.
    Zombie = 5,
}

impl ProcState {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Used,
            2 => Self::Sleeping,
            3 => Self::Runnable,
            4 => Self::Running,
            5 => Self::Zombie,
            _ => Self::Unused,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// The only edges a slot may take. `Used -> Unused` covers allocation
    /// failures that hand the slot straight back.
    #[inline]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Unused => matches!(target, Self::Used),
            Self::Used => matches!(target, Self::Runnable | Self::Unused),
            Self::Runnable => matches!(target, Self::Running),
            Self::Running => matches!(target, Self::Runnable | Self::Sleeping | Self::Zombie),
            Self::Sleeping => matches!(target, Self::Runnable),
            Self::Zombie => matches!(target, Self::Unused),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Used => "used",
            Self::Sleeping => "sleep",
            Self::Runnable => "runble",
            Self::Running => "run",
            Self::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Pid ---

const PID_SLOT_BITS: u32 = 8;
const PID_SLOT_MASK: u32 = (1 << PID_SLOT_BITS) - 1;
const PID_GENERATION_MASK: u32 = u32::MAX >> PID_SLOT_BITS;

const _: () = assert!(MAX_PROCS <= (PID_SLOT_MASK as usize) + 1);

/// Process identifier: a table slot index tagged with the slot's allocation
/// generation. A pid whose generation no longer matches its slot refers to a
/// process that has already been reaped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u32);

impl Pid {
    /// Never handed out; generation zero is reserved.
    pub const INVALID: Pid = Pid(0);

    #[inline]
    pub const fn new(slot: usize, generation: u32) -> Self {
        Pid(((generation & PID_GENERATION_MASK) << PID_SLOT_BITS) | (slot as u32 & PID_SLOT_MASK))
    }

    #[inline]
    pub const fn slot(self) -> usize {
        (self.0 & PID_SLOT_MASK) as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.0 >> PID_SLOT_BITS
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Pid(raw)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.generation() != 0
    }

    /// Generation that follows `generation` for a reused slot, skipping zero.
    #[inline]
    pub const fn next_generation(generation: u32) -> u32 {
        let next = generation.wrapping_add(1) & PID_GENERATION_MASK;
        if next == 0 { 1 } else { next }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({}:{})", self.slot(), self.generation())
    }
}
