use core::fmt;
use std::io::Write;
use std::time::Instant;

use rivet_lib::klog_debug;

rivet_lib::define_service! {
    /// Host platform hooks.
    ///
    /// Registered once before the first boot. `Kernel::boot` installs the
    /// hosted defaults below when nothing else has been registered.
    platform => PlatformServices {
        // -- Console --------------------------------------------------------
        console_write(s: &str);

        // -- Devices --------------------------------------------------------
        disk_init();

        // -- Timer ----------------------------------------------------------
        timer_ticks() -> u64;
    }
}

// -- Hosted defaults ---------------------------------------------------------

static BOOT_INSTANT: spin::Once<Instant> = spin::Once::new();

fn hosted_console_write(s: &str) {
    let _ = std::io::stderr().lock().write_all(s.as_bytes());
}

fn hosted_disk_init() {
    klog_debug!("disk: hosted build, no block device to probe");
}

/// Milliseconds since the platform was first touched.
fn hosted_timer_ticks() -> u64 {
    let start = BOOT_INSTANT.call_once(Instant::now);
    start.elapsed().as_millis() as u64
}

pub static HOSTED_PLATFORM: PlatformServices = PlatformServices {
    console_write: hosted_console_write,
    disk_init: hosted_disk_init,
    timer_ticks: hosted_timer_ticks,
};

/// Register the hosted defaults unless a platform is already installed.
pub fn ensure_platform_services() {
    if !is_platform_initialized() {
        register_platform_services(&HOSTED_PLATFORM);
    }
}

/// klog backend that writes whole lines through the platform console.
pub fn console_klog_backend(args: fmt::Arguments<'_>) {
    let mut line = String::with_capacity(128);
    let _ = fmt::write(&mut line, args);
    line.push('\n');
    console_write(&line);
}
