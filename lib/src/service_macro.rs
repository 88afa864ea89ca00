//! `define_service!`: a table of function pointers registered once at boot
//! by the crate that owns the implementation, plus free-function wrappers
//! for each entry.
//!
//! ```ignore
//! rivet_lib::define_service! {
//!     platform => PlatformServices {
//!         timer_ticks() -> u64;
//!         console_write(s: &str);
//!     }
//! }
//! ```
//!
//! expands to `PlatformServices`, `register_platform_services`,
//! `is_platform_initialized`, `platform_services` and one wrapper per entry
//! (`timer_ticks()`, `console_write(s)`).

#[macro_export]
macro_rules! define_service {
    (
        $(#[$meta:meta])*
        $name:ident => $table:ident {
            $(
                $(#[$fmeta:meta])*
                $func:ident ( $($arg:ident : $arg_ty:ty),* $(,)? ) $(-> $ret:ty)? ;
            )*
        }
    ) => {
        $(#[$meta])*
        pub struct $table {
            $(
                $(#[$fmeta])*
                pub $func: fn($($arg_ty),*) $(-> $ret)?,
            )*
        }

        $crate::paste::paste! {
            static [<$name:upper _SERVICES>]: $crate::spin::Once<&'static $table> =
                $crate::spin::Once::new();

            /// Install the implementation. The first registration wins.
            pub fn [<register_ $name _services>](services: &'static $table) {
                [<$name:upper _SERVICES>].call_once(|| services);
            }

            #[inline]
            pub fn [<is_ $name _initialized>]() -> bool {
                [<$name:upper _SERVICES>].is_completed()
            }

            #[inline]
            pub fn [<$name _services>]() -> &'static $table {
                match [<$name:upper _SERVICES>].get() {
                    Some(services) => services,
                    None => panic!(concat!(stringify!($name), " services used before registration")),
                }
            }

            $(
                $(#[$fmeta])*
                #[inline]
                pub fn $func($($arg: $arg_ty),*) $(-> $ret)? {
                    ([<$name _services>]().$func)($($arg),*)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    static CALLS: AtomicU32 = AtomicU32::new(0);

    crate::define_service! {
        counter => CounterServices {
            bump(by: u32) -> u32;
            reset();
        }
    }

    fn bump_impl(by: u32) -> u32 {
        CALLS.fetch_add(by, Ordering::Relaxed) + by
    }

    fn reset_impl() {
        CALLS.store(0, Ordering::Relaxed);
    }

    static COUNTER: CounterServices = CounterServices {
        bump: bump_impl,
        reset: reset_impl,
    };

    #[test]
    fn wrappers_dispatch_through_registered_table() {
        register_counter_services(&COUNTER);
        assert!(is_counter_initialized());
        reset();
        assert_eq!(bump(2), 2);
        assert_eq!(bump(3), 5);
    }
}
