//! Boot configuration parsed from the kernel command line.

use core::time::Duration;

use rivet_abi::{MAX_PROCS, NCPU, NPROC};

use crate::klog::KlogLevel;
use crate::klog_warn;

const DEFAULT_CPUS: usize = 2;
const DEFAULT_MEM_PAGES: usize = 1024;
const DEFAULT_KSTACK_KIB: usize = 256;
const DEFAULT_IDLE_US: u64 = 200;
const DEFAULT_DEMO: bool = true;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootConfig {
    /// Number of harts to bring up.
    pub cpus: usize,
    /// Process table capacity.
    pub nproc: usize,
    /// Pages the physical page allocator may hand out.
    pub mem_pages: usize,
    pub klog_level: KlogLevel,
    /// Host stack size for each process kernel thread, in KiB.
    pub kstack_kib: usize,
    /// How long an idle hart waits before rescanning, in microseconds.
    pub idle_us: u64,
    /// Whether the kernel binary runs its pipe demo as init.
    pub demo: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            cpus: DEFAULT_CPUS,
            nproc: NPROC,
            mem_pages: DEFAULT_MEM_PAGES,
            klog_level: KlogLevel::Info,
            kstack_kib: DEFAULT_KSTACK_KIB,
            idle_us: DEFAULT_IDLE_US,
            demo: DEFAULT_DEMO,
        }
    }
}

impl BootConfig {
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_micros(self.idle_us)
    }

    #[inline]
    pub fn kstack_bytes(&self) -> usize {
        self.kstack_kib * 1024
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

fn parse_count(token: &str, value: &str, min: usize, max: usize) -> Option<usize> {
    match value.parse::<usize>() {
        Ok(parsed) => Some(parsed.clamp(min, max)),
        Err(_) => {
            klog_warn!("config: ignoring malformed {}", token);
            None
        }
    }
}

pub fn config_from_cmdline(cmdline: Option<&str>) -> BootConfig {
    let mut cfg = BootConfig::default();
    let Some(cmdline) = cmdline else {
        return cfg;
    };

    for token in cmdline.split_whitespace() {
        if let Some(value) = token.strip_prefix("cpus=") {
            if let Some(n) = parse_count(token, value, 1, NCPU) {
                cfg.cpus = n;
            }
        } else if let Some(value) = token.strip_prefix("nproc=") {
            if let Some(n) = parse_count(token, value, 1, MAX_PROCS) {
                cfg.nproc = n;
            }
        } else if let Some(value) = token.strip_prefix("mem.pages=") {
            if let Some(n) = parse_count(token, value, 0, usize::MAX) {
                cfg.mem_pages = n;
            }
        } else if let Some(value) = token.strip_prefix("kstack=") {
            let value = value.trim_end_matches(['K', 'k']);
            if let Some(n) = parse_count(token, value, 64, 16 * 1024) {
                cfg.kstack_kib = n;
            }
        } else if let Some(value) = token.strip_prefix("idle.us=") {
            if let Some(n) = parse_count(token, value, 1, 1_000_000) {
                cfg.idle_us = n as u64;
            }
        } else if let Some(value) = token.strip_prefix("klog=") {
            match KlogLevel::from_name(value) {
                Some(level) => cfg.klog_level = level,
                None => klog_warn!("config: unknown log level {}", value),
            }
        } else if let Some(value) = token.strip_prefix("demo=") {
            if let Some(demo) = parse_bool(value) {
                cfg.demo = demo;
            }
        } else if token == "quiet" {
            cfg.klog_level = KlogLevel::Warn;
        } else {
            klog_warn!("config: ignoring unknown option {}", token);
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cmdline_gives_defaults() {
        assert_eq!(config_from_cmdline(None), BootConfig::default());
        assert_eq!(config_from_cmdline(Some("   ")), BootConfig::default());
    }

    #[test]
    fn tokens_override_defaults() {
        let cfg = config_from_cmdline(Some("cpus=4 nproc=8 mem.pages=32 klog=debug kstack=128K idle.us=50 demo=off"));
        assert_eq!(cfg.cpus, 4);
        assert_eq!(cfg.nproc, 8);
        assert_eq!(cfg.mem_pages, 32);
        assert_eq!(cfg.klog_level, KlogLevel::Debug);
        assert_eq!(cfg.kstack_kib, 128);
        assert_eq!(cfg.idle_timeout(), Duration::from_micros(50));
        assert!(!cfg.demo);
    }

    #[test]
    fn out_of_range_values_clamp() {
        let cfg = config_from_cmdline(Some("cpus=0 nproc=100000"));
        assert_eq!(cfg.cpus, 1);
        assert_eq!(cfg.nproc, MAX_PROCS);
        let cfg = config_from_cmdline(Some("cpus=99"));
        assert_eq!(cfg.cpus, NCPU);
    }

    #[test]
    fn malformed_and_unknown_tokens_are_ignored() {
        let cfg = config_from_cmdline(Some("cpus=many frobnicate klog=shouty quiet"));
        assert_eq!(cfg.cpus, DEFAULT_CPUS);
        assert_eq!(cfg.klog_level, KlogLevel::Warn);
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
