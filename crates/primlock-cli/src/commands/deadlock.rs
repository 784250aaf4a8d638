//! `primlock deadlock`: the classic two-lock cycle.
//!
//! The main thread holds L2 and a worker holds L1. The worker then waits for
//! L2, and the main thread closes the cycle by asking for L1.

use anyhow::{anyhow, bail};
use crossbeam::channel;
use primlock_core::{Lock, LockError, LockManager, SessionId};
use std::thread;
use std::time::{Duration, Instant};

/// How the closing request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Refused up front with the detected cycle
    Refused {
        requester: SessionId,
        cycle: Vec<SessionId>,
    },
    /// Detection was off and the bounded request expired
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    pub main: SessionId,
    pub worker: SessionId,
    pub outcome: Outcome,
}

pub fn execute(manager: &LockManager, timeout: Duration) -> anyhow::Result<()> {
    let report = run(manager, timeout)?;

    println!("Holding L2:   {}", report.main);
    println!("Holding L1:   {}", report.worker);
    match &report.outcome {
        Outcome::Refused { requester, cycle } => {
            let cycle: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            println!("Refused:      {}", requester);
            println!("Cycle:        {}", cycle.join(" -> "));
        }
        Outcome::TimedOut => {
            println!("Refused:      none (detection off)");
            println!("Timed out:    {} after {:?}", report.main, timeout);
        }
    }
    Ok(())
}

/// Set up the cycle and report what happened to the request closing it
pub fn run(manager: &LockManager, timeout: Duration) -> anyhow::Result<DeadlockReport> {
    let first = manager.create_lock("L1")?;
    let second = manager.create_lock("L2")?;
    second.exclusive_lock()?;
    let main = manager.session().id();

    let (held_tx, held_rx) = channel::bounded(0);
    let result = thread::scope(|scope| {
        let worker = {
            let (first, second) = (&first, &second);
            scope.spawn(move || -> anyhow::Result<()> {
                first.exclusive_lock()?;
                held_tx.send(manager.session().id())?;
                second.exclusive_lock()?;
                second.unlock()?;
                first.unlock()?;
                manager.close_session();
                Ok(())
            })
        };

        let closing = held_rx
            .recv()
            .map_err(|_| anyhow!("worker exited before taking L1"))
            .and_then(|worker| {
                wait_for_queue(&second, 1)?;
                let outcome = close_cycle(manager, &first, timeout)?;
                Ok((worker, outcome))
            });

        // Let the worker finish whatever happened above
        second.unlock()?;
        worker
            .join()
            .map_err(|_| anyhow!("deadlock worker panicked"))??;
        closing
    });
    let (worker, outcome) = result?;

    tracing::info!(%main, %worker, ?outcome, "deadlock scenario finished");
    Ok(DeadlockReport {
        main,
        worker,
        outcome,
    })
}

fn close_cycle(manager: &LockManager, first: &Lock, timeout: Duration) -> anyhow::Result<Outcome> {
    if !manager.options().deadlock_detection {
        return match first.exclusive_lock_timeout(timeout)? {
            false => Ok(Outcome::TimedOut),
            true => bail!("L1 was granted while the worker still held it"),
        };
    }
    match first.exclusive_lock() {
        Err(LockError::Deadlock {
            requester, cycle, ..
        }) => Ok(Outcome::Refused { requester, cycle }),
        Err(err) => Err(err.into()),
        Ok(()) => bail!("L1 was granted while the worker still held it"),
    }
}

fn wait_for_queue(lock: &Lock, len: usize) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while lock.queue_len() < len {
        if Instant::now() >= deadline {
            bail!("worker never queued on {}", lock.name());
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
