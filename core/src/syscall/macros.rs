/// Declarative macro for defining syscall handlers.
///
/// # Syntax
///
/// ```ignore
/// define_syscall!(sys_name(arg: Type, ...) { body });
/// ```
///
/// The body evaluates to `KernelResult<usize>` and may use `?`. The
/// generated `pub fn sys_name(arg: Type, ...) -> isize` flattens the result
/// to the user convention (`>= 0` ok, `-1` failure) through
/// [`syscall_return`](crate::syscall::dispatch::syscall_return), which also
/// exits a process that was killed during the call.
#[macro_export]
macro_rules! define_syscall {
    ($(#[$meta:meta])* $name:ident($($arg:ident : $ty:ty),* $(,)?) $body:block) => {
        $(#[$meta])*
        pub fn $name($($arg: $ty),*) -> isize {
            let result = (move || -> $crate::error::KernelResult<usize> { $body })();
            $crate::syscall::dispatch::syscall_return(stringify!($name), result)
        }
    };
}

