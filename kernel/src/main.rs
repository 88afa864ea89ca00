//! Hosted kernel entry point.
//!
//! Boots the harts with a configuration taken from the command line (or
//! `RIVET_CMDLINE`), runs a producer/consumer pipeline as init, dumps the
//! process table and halts.

use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use rivet_abi::PGSIZE;
use rivet_core::platform::timer_ticks;
use rivet_core::syscall::{sys_close, sys_pipe, sys_read, sys_sbrk, sys_spawn, sys_wait, sys_write};
use rivet_core::{Kernel, copy_from_user, copy_to_user};
use rivet_lib::{config_from_cmdline, klog_error, klog_info, klog_warn};

const STDOUT: i32 = 1;
const MESSAGES: usize = 8;
const DEMO_TIMEOUT: Duration = Duration::from_secs(30);

fn cmdline() -> Option<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Some(args.join(" "));
    }
    std::env::var("RIVET_CMDLINE").ok()
}

/// Little-endian `i32` pair stored by `pipe` at `addr`.
fn load_fds(addr: usize) -> Option<(i32, i32)> {
    let mut bytes = [0u8; 8];
    copy_from_user(addr, &mut bytes).ok()?;
    Some((
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    ))
}

fn producer(buf: usize, rfd: i32, wfd: i32) -> i32 {
    sys_close(rfd);
    for n in 0..MESSAGES {
        let line = format!("message {} from pid {}\n", n, rivet_core::getpid());
        if copy_to_user(buf, line.as_bytes()).is_err() {
            return 1;
        }
        if sys_write(wfd, buf, line.len()) != line.len() as isize {
            return 2;
        }
    }
    sys_close(wfd);
    0
}

fn consumer(buf: usize, rfd: i32, wfd: i32) -> i32 {
    sys_close(wfd);
    let mut total = 0;
    loop {
        let n = sys_read(rfd, buf, 64);
        if n < 0 {
            return 1;
        }
        if n == 0 {
            break;
        }
        total += n;
        if sys_write(STDOUT, buf, n as usize) != n {
            return 2;
        }
    }
    sys_close(rfd);
    klog_info!("consumer: {} bytes", total);
    0
}

fn pipeline_demo() -> i32 {
    let Ok(base) = usize::try_from(sys_sbrk(2 * PGSIZE as isize)) else {
        klog_error!("demo: sbrk failed");
        return 1;
    };
    if sys_pipe(base) < 0 {
        klog_error!("demo: pipe failed");
        return 1;
    }
    let Some((rfd, wfd)) = load_fds(base) else {
        return 1;
    };

    let producer_buf = base + 16;
    let consumer_buf = base + PGSIZE;
    let children = [
        sys_spawn("producer", move || producer(producer_buf, rfd, wfd)),
        sys_spawn("consumer", move || consumer(consumer_buf, rfd, wfd)),
    ];
    sys_close(rfd);
    sys_close(wfd);

    Kernel::current().procdump();

    let mut failed = 0;
    for _ in children.iter().filter(|pid| **pid >= 0) {
        let pid = sys_wait(base);
        let mut status = [0u8; 4];
        let status = match copy_from_user(base, &mut status) {
            Ok(()) => i32::from_le_bytes(status),
            Err(_) => -1,
        };
        klog_info!("demo: pid {} exited with status {}", pid, status);
        if status != 0 {
            failed += 1;
        }
    }
    if children.iter().any(|pid| *pid < 0) {
        klog_warn!("demo: a child could not be started");
        failed += 1;
    }
    failed
}

fn main() -> ExitCode {
    let config = config_from_cmdline(cmdline().as_deref());
    let demo = config.demo;
    let (done_tx, done_rx) = mpsc::channel();

    let kernel = match Kernel::boot(config, move || {
        let failed = if demo { pipeline_demo() } else { 0 };
        let _ = done_tx.send(failed);
        0
    }) {
        Ok(kernel) => kernel,
        Err(err) => {
            klog_error!("boot failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let failed = match done_rx.recv_timeout(DEMO_TIMEOUT) {
        Ok(failed) => failed,
        Err(_) => {
            klog_error!("init did not finish within {:?}", DEMO_TIMEOUT);
            kernel.procdump();
            1
        }
    };

    kernel.halt();
    if !kernel.wait_halted(Duration::from_secs(2)) {
        klog_warn!("harts still online after halt");
    }
    klog_info!(
        "halted after {} ms, {} context switches",
        timer_ticks(),
        kernel.context_switches()
    );

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
