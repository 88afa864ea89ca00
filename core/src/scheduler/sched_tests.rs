//! Scheduler, process lifecycle and sleep/wakeup scenarios.
//!
//! Each test boots its own kernel and drives it from the init program.
//! Results come back over `mpsc` channels with bounded waits, so a lost
//! wakeup shows up as a timeout instead of a hung test run.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use rivet_abi::{Pid, ProcState};
use rivet_lib::Spinlock;

use super::lifecycle::{exit, spawn, wait};
use super::proc::{getpid, killed, myproc};
use super::scheduler::yield_now;
use super::sleep::{Channel, sleep, wakeup};
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::test_support::{Gate, TIMEOUT, boot_with, wait_until};

#[test]
fn init_runs_first_and_owns_pid_one() {
    let (tx, rx) = mpsc::channel();
    let k = boot_with("cpus=1", move || {
        let _ = tx.send(getpid());
        0
    });

    let pid = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(k.initproc(), Some(pid));
    assert_eq!(pid.slot(), 0);
    assert!(pid.is_valid());
}

#[test]
fn spinlock_counter_survives_many_processes() {
    const WORKERS: usize = 4;
    const ROUNDS: u64 = 5_000;

    let counter = Arc::new(Spinlock::new("counter", 0u64));
    let shared = Arc::clone(&counter);
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=4", move || {
        for n in 0..WORKERS {
            let counter = Arc::clone(&shared);
            spawn(&format!("worker{}", n), move || {
                for round in 0..ROUNDS {
                    *counter.lock() += 1;
                    if round % 500 == 0 {
                        yield_now();
                    }
                }
                0
            })
            .unwrap();
        }
        for _ in 0..WORKERS {
            wait().unwrap();
        }
        let _ = tx.send(*shared.lock());
        0
    });

    let total = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(total, WORKERS as u64 * ROUNDS);
    assert_eq!(*counter.lock(), WORKERS as u64 * ROUNDS);
}

/// Single-slot mailbox between one producer and one consumer. Every hand-off
/// needs a wakeup, so one lost wakeup stalls the run.
#[test]
fn capacity_one_mailbox_never_loses_a_wakeup() {
    const ITEMS: u64 = 2_000;

    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=2", move || {
        let slot = Arc::new(Spinlock::new("mailbox", None::<u64>));
        let not_empty = Channel::unique();
        let not_full = Channel::unique();

        let producer_slot = Arc::clone(&slot);
        spawn("producer", move || {
            for item in 1..=ITEMS {
                let mut guard = producer_slot.lock();
                while guard.is_some() {
                    guard = sleep(not_full, guard);
                }
                *guard = Some(item);
                wakeup(not_empty);
            }
            0
        })
        .unwrap();

        let consumer_slot = Arc::clone(&slot);
        let consumer_tx = tx.clone();
        spawn("consumer", move || {
            let mut sum = 0;
            for _ in 0..ITEMS {
                let mut guard = consumer_slot.lock();
                let item = loop {
                    match guard.take() {
                        Some(item) => break item,
                        None => guard = sleep(not_empty, guard),
                    }
                };
                wakeup(not_full);
                drop(guard);
                sum += item;
            }
            let _ = consumer_tx.send(sum);
            0
        })
        .unwrap();

        wait().unwrap();
        wait().unwrap();
        0
    });

    let sum = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(sum, ITEMS * (ITEMS + 1) / 2);
}

#[test]
fn wakeup_only_touches_its_own_channel() {
    let x = Gate::new();
    let y = Gate::new();
    let (tx, rx) = mpsc::channel();

    let (gx, gy) = (x.clone(), y.clone());
    let k = boot_with("cpus=2", move || {
        let a = spawn("a", move || {
            gx.pass();
            1
        })
        .unwrap();
        let b = spawn("b", move || {
            gy.pass();
            2
        })
        .unwrap();
        let _ = tx.send((a, b));
        let first = wait().unwrap();
        let second = wait().unwrap();
        let _ = tx.send((first.0, second.0));
        0
    });

    let (a, b) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || {
        k.state_of(a) == Some(ProcState::Sleeping) && k.state_of(b) == Some(ProcState::Sleeping)
    }));

    x.open(&k);
    assert!(wait_until(TIMEOUT, || k.state_of(a).is_none()));
    let rows = k.procs_snapshot();
    let row_b = rows.iter().find(|row| row.pid == b).unwrap();
    assert_eq!(row_b.state, ProcState::Sleeping);
    assert_eq!(row_b.chan, Some(y.chan()));

    y.open(&k);
    let (first, second) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!((first, second), (a, b));
}

#[test]
fn wait_without_children_fails_immediately() {
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=1", move || {
        let _ = tx.send(wait().map(|(pid, _)| pid));
        0
    });

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(KernelError::NoChild));
}

#[test]
fn exit_status_reaches_the_parent() {
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=2", move || {
        let returns = spawn("returns", || 7).unwrap();
        let exits = spawn("exits", || {
            exit(42);
        })
        .unwrap();

        let mut seen = HashSet::new();
        for _ in 0..2 {
            seen.insert(wait().unwrap());
        }
        let _ = tx.send((seen, returns, exits));
        0
    });

    let (seen, returns, exits) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(seen.contains(&(returns, 7)));
    assert!(seen.contains(&(exits, 42)));
}

#[test]
fn orphans_are_reparented_to_init_and_reaped() {
    let gate = Gate::new();
    let (tx, rx) = mpsc::channel();

    let child_gate = gate.clone();
    let k = boot_with("cpus=2", move || {
        let middle_tx = tx.clone();
        spawn("middle", move || {
            let orphan = spawn("orphan", move || {
                child_gate.pass();
                0
            })
            .unwrap();
            let _ = middle_tx.send(orphan);
            0
        })
        .unwrap();
        wait().unwrap();
        0
    });

    let orphan = rx.recv_timeout(TIMEOUT).unwrap();
    let init = k.initproc().unwrap();
    assert!(wait_until(TIMEOUT, || {
        k.procs_snapshot()
            .iter()
            .any(|row| row.pid == orphan && row.parent == Some(init))
    }));

    gate.open(&k);
    assert!(wait_until(TIMEOUT, || k.state_of(orphan).is_none()));
}

#[test]
fn zombie_slot_is_reused_only_after_wait() {
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=2 nproc=2", move || {
        let first = spawn("first", || 3).unwrap();

        // Until it is reaped the child holds the only free slot.
        let mut blocked = Vec::new();
        while Kernel::current().find(first).map(|p| p.state()) != Some(ProcState::Zombie) {
            blocked.push(spawn("extra", || 0).map(|_| ()));
            yield_now();
        }
        let while_zombie = spawn("extra", || 0).map(|_| ());

        let reaped = wait().unwrap();
        let second = spawn("second", || 4).unwrap();
        let reaped_second = wait().unwrap();
        let _ = tx.send((first, blocked, while_zombie, reaped, second, reaped_second));
        0
    });

    let (first, blocked, while_zombie, reaped, second, reaped_second) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(blocked.iter().all(|r| *r == Err(KernelError::TableFull)));
    assert_eq!(while_zombie, Err(KernelError::TableFull));
    assert_eq!(reaped, (first, 3));
    assert_eq!(second.slot(), first.slot());
    assert_ne!(second, first);
    assert_eq!(reaped_second, (second, 4));
}

#[test]
fn out_of_memory_is_reported_and_recovered() {
    // init takes a kernel stack, a root table and one data page.
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=1 mem.pages=4", move || {
        let kmem = Kernel::current().kmem();
        let before = kmem.free_pages();
        let result = spawn("hungry", || 0).map(|_| ());
        let after = kmem.free_pages();
        let _ = tx.send((result, before, after));
        0
    });

    let (result, before, after) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(result, Err(KernelError::OutOfMemory));
    assert_eq!(before, after);
}

#[test]
fn kill_of_a_reaped_pid_is_rejected() {
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=1", move || {
        let child = spawn("short", || 0).unwrap();
        wait().unwrap();
        let stale = Kernel::current().kill(child);
        let bogus = Kernel::current().kill(Pid::new(child.slot(), child.generation() + 7));
        let _ = tx.send((stale, bogus));
        0
    });

    let (stale, bogus) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(stale, Err(KernelError::NoProcess));
    assert_eq!(bogus, Err(KernelError::NoProcess));
}

#[test]
fn kill_alone_does_not_wake_a_sleeper() {
    let gate = Gate::new();
    let (pid_tx, pid_rx) = mpsc::channel();
    let (status_tx, status_rx) = mpsc::channel();

    let child_gate = gate.clone();
    let k = boot_with("cpus=2", move || {
        let victim = spawn("victim", move || {
            if child_gate.pass_unless_killed() {
                0
            } else {
                -1
            }
        })
        .unwrap();
        let _ = pid_tx.send(victim);
        let _ = status_tx.send(wait().map(|(_, status)| status));
        0
    });

    let victim = pid_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || k.state_of(victim) == Some(ProcState::Sleeping)));

    k.kill(victim).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let row = k.procs_snapshot().into_iter().find(|row| row.pid == victim).unwrap();
    assert_eq!(row.state, ProcState::Sleeping);
    assert!(row.killed);

    // The next broadcast on its channel lets it notice.
    k.wakeup(gate.chan());
    assert_eq!(status_rx.recv_timeout(TIMEOUT).unwrap(), Ok(-1));
}

#[test]
fn killed_parent_stops_waiting() {
    let gate = Gate::new();
    let (tx, rx) = mpsc::channel();

    let child_gate = gate.clone();
    let k = boot_with("cpus=2", move || {
        let parent_tx = tx.clone();
        spawn("parent", move || {
            spawn("child", move || {
                child_gate.pass();
                0
            })
            .unwrap();
            let _ = parent_tx.send(Ok(getpid()));
            let _ = parent_tx.send(wait().map(|(pid, _)| pid));
            0
        })
        .unwrap();
        wait().unwrap();
        0
    });

    let parent = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert!(wait_until(TIMEOUT, || k.state_of(parent) == Some(ProcState::Sleeping)));
    k.kill(parent).unwrap();
    k.wakeup(Channel::child_exit(parent));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(KernelError::Interrupted));

    gate.open(&k);
}

#[test]
fn yield_storm_completes_on_every_hart_count() {
    for cpus in [1, 3] {
        let (tx, rx) = mpsc::channel();
        let k = boot_with(&format!("cpus={}", cpus), move || {
            for n in 0..8 {
                spawn(&format!("yielder{}", n), move || {
                    for _ in 0..200 {
                        yield_now();
                    }
                    n
                })
                .unwrap();
            }
            let mut statuses: Vec<i32> = (0..8).map(|_| wait().unwrap().1).collect();
            statuses.sort_unstable();
            let _ = tx.send(statuses);
            0
        });

        let statuses = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(statuses, (0..8).collect::<Vec<_>>());
        assert!(k.context_switches() >= 8 * 200);
    }
}

#[test]
fn procdump_shows_sleepers_and_their_channel() {
    let gate = Gate::new();
    let (tx, rx) = mpsc::channel();

    let child_gate = gate.clone();
    let k = boot_with("cpus=1", move || {
        let pid = spawn("sleeper", move || {
            child_gate.pass();
            0
        })
        .unwrap();
        let _ = tx.send(pid);
        wait().unwrap();
        0
    });

    let sleeper = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || k.state_of(sleeper) == Some(ProcState::Sleeping)));

    let rows = k.procdump();
    let row = rows.iter().find(|row| row.pid == sleeper).unwrap();
    assert_eq!(row.name, "sleeper");
    assert_eq!(row.chan, Some(gate.chan()));
    assert_eq!(row.parent, k.initproc());
    assert!(rows.iter().any(|row| row.name == "init"));
    assert!(!killed(k.find(sleeper).unwrap()));

    gate.open(&k);
    assert!(wait_until(TIMEOUT, || k.state_of(sleeper).is_none()));
}

#[test]
fn processes_never_see_a_foreign_current_proc() {
    let (tx, rx) = mpsc::channel();
    let _k = boot_with("cpus=3", move || {
        for n in 0..6 {
            let tx = tx.clone();
            spawn("whoami", move || {
                let me = getpid();
                for _ in 0..100 {
                    yield_now();
                    if myproc().pid() != me {
                        let _ = tx.send(Err(n));
                        return 1;
                    }
                }
                let _ = tx.send(Ok(n));
                0
            })
            .unwrap();
        }
        for _ in 0..6 {
            wait().unwrap();
        }
        0
    });

    for _ in 0..6 {
        assert!(rx.recv_timeout(TIMEOUT).unwrap().is_ok());
    }
}
