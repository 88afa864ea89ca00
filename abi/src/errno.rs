//! POSIX errno values used by the kernel error type.

pub const EPERM: i32 = -1;
pub const ESRCH: i32 = -3;
pub const EINTR: i32 = -4;
pub const EBADF: i32 = -9;
pub const ECHILD: i32 = -10;
pub const EAGAIN: i32 = -11;
pub const ENOMEM: i32 = -12;
pub const EFAULT: i32 = -14;
pub const EINVAL: i32 = -22;
pub const ENFILE: i32 = -23;
pub const EMFILE: i32 = -24;
pub const EPIPE: i32 = -32;
pub const ENOSYS: i32 = -38;
