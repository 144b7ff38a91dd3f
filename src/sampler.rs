use std::fs;
use std::io;

use serde::Serialize;
use sysinfo::System;

/// Cumulative per-core tick counters since boot, one row of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuSample {
    pub per_core_usage: Vec<u8>,
    pub load_average: [f64; 3],
    pub core_count: usize,
}

/// Usage between two snapshots of the same core, rounded to the nearest
/// percent. A non-positive total delta (first sample, counter anomaly) reads
/// as 0 rather than a divide-by-zero or negative artifact.
pub fn usage_percent(prev: &CpuTimes, curr: &CpuTimes) -> u8 {
    let total_delta = curr.total() as i64 - prev.total() as i64;
    if total_delta <= 0 {
        return 0;
    }
    let idle_delta = (curr.idle as i64 - prev.idle as i64).max(0);
    let busy = 1.0 - idle_delta as f64 / total_delta as f64;
    (busy * 100.0).round().clamp(0.0, 100.0) as u8
}

fn parse_stat(buf: &str) -> Vec<CpuTimes> {
    let mut cores = Vec::new();
    for line in buf.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else { continue };
        // per-core rows are "cpu0", "cpu1", ...; the bare "cpu" aggregate and
        // the intr/ctxt/btime rows are skipped
        if !label.starts_with("cpu") || label == "cpu" {
            continue;
        }
        let mut fields = [0u64; 7];
        for slot in fields.iter_mut() {
            *slot = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        cores.push(CpuTimes {
            user: fields[0],
            nice: fields[1],
            system: fields[2],
            idle: fields[3],
            iowait: fields[4],
            irq: fields[5],
            softirq: fields[6],
        });
    }
    cores
}

fn read_proc_stat() -> io::Result<Vec<CpuTimes>> {
    Ok(parse_stat(&fs::read_to_string("/proc/stat")?))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Holds the previous snapshot so every sample reports usage relative to the
/// immediately preceding call, not to process start.
pub struct CpuSampler {
    prev: Vec<CpuTimes>,
}

impl CpuSampler {
    /// Seeds the baseline snapshot so the first `sample()` already has a
    /// delta to work against.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            prev: read_proc_stat()?,
        })
    }

    pub fn sample(&mut self) -> io::Result<CpuSample> {
        let curr = read_proc_stat()?;
        let zero = CpuTimes::default();
        let per_core_usage = curr
            .iter()
            .enumerate()
            .map(|(i, times)| usage_percent(self.prev.get(i).unwrap_or(&zero), times))
            .collect();
        let load = System::load_average();
        let sample = CpuSample {
            per_core_usage,
            load_average: [round2(load.one), round2(load.five), round2(load.fifteen)],
            core_count: curr.len(),
        };
        self.prev = curr;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_TEXT: &str = "\
cpu  8162104 3783 1142670 137364306 129028 0 52725 0 0 0
cpu0 2042554 1003 287240 34336234 32105 0 20142 0 0 0
cpu1 2039850 927 285430 34342072 32310 0 10861 0 0 0
intr 338501328 11 1913 0 0 0 0 0 0 1 0
ctxt 721852668
btime 1693409147
";

    fn times(user: u64, idle: u64) -> CpuTimes {
        CpuTimes {
            user,
            idle,
            ..CpuTimes::default()
        }
    }

    #[test]
    fn parses_per_core_rows_and_skips_the_rest() {
        let cores = parse_stat(STAT_TEXT);
        assert_eq!(cores.len(), 2);
        assert_eq!(cores[0].user, 2042554);
        assert_eq!(cores[0].idle, 34336234);
        assert_eq!(cores[1].softirq, 10861);
    }

    #[test]
    fn busy_interval_reads_one_hundred() {
        let prev = times(100, 100);
        let curr = times(200, 100);
        assert_eq!(usage_percent(&prev, &curr), 100);
    }

    #[test]
    fn idle_interval_reads_zero() {
        let prev = times(100, 100);
        let curr = times(100, 200);
        assert_eq!(usage_percent(&prev, &curr), 0);
    }

    #[test]
    fn mixed_interval_rounds_to_nearest_percent() {
        let prev = times(100, 100);
        let curr = times(200, 200);
        assert_eq!(usage_percent(&prev, &curr), 50);
    }

    #[test]
    fn non_positive_total_delta_reads_zero() {
        let snap = times(500, 500);
        assert_eq!(usage_percent(&snap, &snap), 0);
        // counters went backwards, e.g. after a clock anomaly
        let earlier = times(100, 100);
        assert_eq!(usage_percent(&snap, &earlier), 0);
    }

    #[test]
    fn usage_stays_within_bounds_for_skewed_counters() {
        // idle delta larger than total delta would go negative unclamped
        let prev = CpuTimes {
            user: 200,
            idle: 100,
            ..CpuTimes::default()
        };
        let curr = CpuTimes {
            user: 210,
            idle: 300,
            ..CpuTimes::default()
        };
        let usage = usage_percent(&prev, &curr);
        assert!(usage <= 100);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sampler_reports_bounded_values_from_first_call() {
        let mut sampler = CpuSampler::new().unwrap();
        let sample = sampler.sample().unwrap();
        assert!(sample.core_count > 0);
        assert_eq!(sample.per_core_usage.len(), sample.core_count);
        assert!(sample.per_core_usage.iter().all(|&u| u <= 100));
        assert!(sample.load_average.iter().all(|&l| l >= 0.0));

        // second call replaces the baseline and stays bounded
        let again = sampler.sample().unwrap();
        assert!(again.per_core_usage.iter().all(|&u| u <= 100));
    }
}
