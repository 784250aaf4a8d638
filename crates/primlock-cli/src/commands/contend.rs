//! `primlock contend`: many threads hammering one named lock.

use anyhow::{anyhow, ensure};
use primlock_core::{Lock, LockError, LockManager, ManagerSnapshot, Rank};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

const LOCK_NAME: &str = "contended";

/// Shape of the generated load
#[derive(Debug, Clone)]
pub struct ContendOptions {
    pub threads: usize,
    pub iterations: usize,
    pub shared_ratio: f64,
    pub max_rank: Rank,
    pub timeout: Option<Duration>,
    pub upgrade: bool,
    pub seed: Option<u64>,
}

/// Outcome counts, summed over all workers
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ContendReport {
    pub shared_granted: usize,
    pub exclusive_granted: usize,
    pub upgrades: usize,
    pub timed_out: usize,
    pub deadlocks: usize,
    pub interrupted: usize,
    pub elapsed_ms: u128,
}

impl ContendReport {
    fn merge(&mut self, other: &ContendReport) {
        self.shared_granted += other.shared_granted;
        self.exclusive_granted += other.exclusive_granted;
        self.upgrades += other.upgrades;
        self.timed_out += other.timed_out;
        self.deadlocks += other.deadlocks;
        self.interrupted += other.interrupted;
    }

    pub fn granted(&self) -> usize {
        self.shared_granted + self.exclusive_granted
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a ContendReport,
    snapshot: &'a ManagerSnapshot,
}

pub fn execute(manager: &LockManager, options: &ContendOptions, json: bool) -> anyhow::Result<()> {
    let report = run(manager, options)?;

    if json {
        let snapshot = manager.snapshot();
        let output = JsonOutput {
            report: &report,
            snapshot: &snapshot,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let total = options.threads * options.iterations;
    println!("Requests:     {} ({} threads x {})", total, options.threads, options.iterations);
    println!("Shared:       {}", report.shared_granted);
    println!("Exclusive:    {}", report.exclusive_granted);
    if options.upgrade {
        println!("Upgrades:     {}", report.upgrades);
    }
    if options.timeout.is_some() {
        println!("Timed out:    {}", report.timed_out);
    }
    println!("Deadlocks:    {}", report.deadlocks);
    if report.interrupted > 0 {
        println!("Interrupted:  {}", report.interrupted);
    }
    println!("Elapsed:      {} ms", report.elapsed_ms);
    Ok(())
}

/// Run the load and collect the counts
pub fn run(manager: &LockManager, options: &ContendOptions) -> anyhow::Result<ContendReport> {
    ensure!(
        (0.0..=1.0).contains(&options.shared_ratio),
        "shared ratio {} is not between 0 and 1",
        options.shared_ratio
    );
    let seed = options.seed.unwrap_or_else(rand::random);
    tracing::info!(
        threads = options.threads,
        iterations = options.iterations,
        seed,
        "starting contention run"
    );

    let start = Instant::now();
    let mut report = thread::scope(|scope| {
        let workers: Vec<_> = (0..options.threads)
            .map(|worker| {
                let rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
                scope.spawn(move || worker_loop(manager, options, rng))
            })
            .collect();

        let mut report = ContendReport::default();
        for worker in workers {
            let partial = worker
                .join()
                .map_err(|_| anyhow!("contention worker panicked"))??;
            report.merge(&partial);
        }
        Ok::<_, anyhow::Error>(report)
    })?;
    report.elapsed_ms = start.elapsed().as_millis();

    tracing::info!(
        granted = report.granted(),
        deadlocks = report.deadlocks,
        timed_out = report.timed_out,
        elapsed_ms = report.elapsed_ms as u64,
        "contention run finished"
    );
    Ok(report)
}

fn worker_loop(
    manager: &LockManager,
    options: &ContendOptions,
    mut rng: StdRng,
) -> anyhow::Result<ContendReport> {
    let lock = manager.create_lock(LOCK_NAME)?;
    let max_rank = options.max_rank.max(0);
    let mut report = ContendReport::default();

    for _ in 0..options.iterations {
        let rank = rng.gen_range(0..=max_rank);
        let shared = rng.gen_bool(options.shared_ratio);

        let outcome = match (shared, options.timeout) {
            (true, Some(timeout)) => lock.priority_shared_lock_timeout(rank, timeout),
            (true, None) => lock.priority_shared_lock(rank).map(|_| true),
            (false, Some(timeout)) => lock.priority_exclusive_lock_timeout(rank, timeout),
            (false, None) => lock.priority_exclusive_lock(rank).map(|_| true),
        };
        if !tally(&mut report, outcome)? {
            continue;
        }
        if shared {
            report.shared_granted += 1;
            if options.upgrade {
                upgrade(&lock, rank, options.timeout, &mut report)?;
            }
        } else {
            report.exclusive_granted += 1;
        }
        lock.unlock()?;
    }

    manager.close_session();
    Ok(report)
}

/// Try to turn a held shared grant into an exclusive one
fn upgrade(
    lock: &Lock,
    rank: Rank,
    timeout: Option<Duration>,
    report: &mut ContendReport,
) -> anyhow::Result<()> {
    let outcome = match timeout {
        Some(timeout) => lock.priority_exclusive_lock_timeout(rank, timeout),
        None => lock.priority_exclusive_lock(rank).map(|_| true),
    };
    if tally(report, outcome)? {
        report.upgrades += 1;
    }
    Ok(())
}

/// Count a failed request; true if the request was granted
fn tally(report: &mut ContendReport, outcome: Result<bool, LockError>) -> anyhow::Result<bool> {
    match outcome {
        Ok(true) => Ok(true),
        Ok(false) => {
            report.timed_out += 1;
            Ok(false)
        }
        Err(LockError::Deadlock { .. }) => {
            report.deadlocks += 1;
            Ok(false)
        }
        Err(LockError::Interrupted { .. }) => {
            report.interrupted += 1;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}
