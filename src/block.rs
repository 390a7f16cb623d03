//! The pipeline stage abstraction and its thread-per-stage scheduler.
//!
//! Grounded on the teacher crate's `block.rs` (the `Block` trait and its
//! `BlockRet` status enum) and `mtgraph.rs` (the thread-per-block scheduler
//! with two-phase done detection). The receive pipeline's nine stages (§2
//! of the specification) are fixed and linear rather than an arbitrary
//! graph, so `Pipeline` drops `mtgraph::MTGraph`'s general block/stream
//! wiring in favor of a plain `Vec<Box<dyn Stage>>` run in order, but keeps
//! its concurrency model: one OS thread per stage, a shared
//! `CancellationToken`, and bottom-up joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info};

/// What a [`Stage::work`] call accomplished in one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRet {
    /// Made progress; call again immediately.
    Ok,
    /// No input was available to make progress; back off briefly.
    Pending,
    /// The stage's input queue is closed and drained: this stage is done
    /// and will never produce again.
    Eof,
}

/// One stage of the receive pipeline.
///
/// A stage owns its input and output [`crate::queue::Queue`] handles (it
/// is up to each concrete stage to store the ones it needs) and is driven
/// by repeated calls to `work` from its own dedicated thread, exactly as
/// the teacher's blocks are driven by `mtgraph::MTGraph`.
pub trait Stage: Send {
    /// Human-readable name, used in logs and thread names.
    fn name(&self) -> &str;

    /// Do one unit of work: read from input queues, process, write to
    /// output queues. Should not block for long; [`StageRet::Pending`]
    /// tells the scheduler to sleep and retry rather than the stage
    /// blocking indefinitely itself.
    fn work(&mut self) -> Result<StageRet>;
}

/// A cooperative, clonable cancellation flag shared by every stage thread
/// in a [`Pipeline`], mirroring the teacher crate's `graph::CancellationToken`
/// (referenced by, but not defined in, the copy of `mtgraph.rs` this crate
/// was grounded on — reconstructed here from its usage: `new`, `clone`,
/// `cancel`, `is_canceled`).
#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, not-yet-canceled token.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request that every stage sharing this token stop at its next
    /// opportunity.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancellationToken::cancel`] has been called.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a fixed sequence of [`Stage`]s, one OS thread each, until every
/// stage reports [`StageRet::Eof`] or the pipeline is canceled.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    cancel_token: CancellationToken,
}

const IDLE_SLEEP: Duration = Duration::from_millis(1);

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Append a stage. Stages run in the order they are added; that order
    /// has no effect on scheduling (every stage gets its own thread) but
    /// determines join order on shutdown.
    pub fn add(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    /// A token that can be used to cancel the pipeline from outside, e.g.
    /// on Ctrl-C.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Run every stage to completion.
    ///
    /// Each stage runs on its own thread in a `while !canceled { work() }`
    /// loop, sleeping briefly on `Pending` and returning on `Eof`. When
    /// every stage has independently reached `Eof` the pipeline is done;
    /// threads are joined bottom-up (reverse of add order), matching the
    /// teacher scheduler's join order.
    pub fn run(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut threads = Vec::new();
        let mut index = self.stages.len();
        while let Some(mut stage) = self.stages.pop() {
            index -= 1;
            let cancel_token = self.cancel_token.clone();
            let name = stage.name().to_string();
            debug!("starting stage thread {name}");
            let th = std::thread::Builder::new().name(name.clone()).spawn(
                move || -> Result<Duration> {
                    let mut total = Duration::new(0, 0);
                    while !cancel_token.is_canceled() {
                        let st = Instant::now();
                        let ret = stage.work()?;
                        total += st.elapsed();
                        match ret {
                            StageRet::Ok => {}
                            StageRet::Eof => return Ok(total),
                            StageRet::Pending => std::thread::sleep(IDLE_SLEEP),
                        }
                    }
                    Ok(total)
                },
            );
            let th = match th {
                Ok(th) => th,
                Err(e) => {
                    error!("failed to spawn stage thread {index}: {e}");
                    self.cancel_token.cancel();
                    break;
                }
            };
            threads.push(th);
        }
        debug!("joining stage threads");
        for th in threads.into_iter().rev() {
            let name = th.thread().name().unwrap().to_string();
            match th.join() {
                Ok(Ok(elapsed)) => debug!("stage {name} finished after {elapsed:?}"),
                Ok(Err(e)) => error!("stage {name} returned error: {e}"),
                Err(_) => error!("stage {name} panicked"),
            }
        }
        info!("pipeline finished in {:?}", start.elapsed());
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingStage {
        remaining: usize,
        counter: Arc<AtomicUsize>,
    }

    impl Stage for CountingStage {
        fn name(&self) -> &str {
            "counting"
        }
        fn work(&mut self) -> Result<StageRet> {
            if self.remaining == 0 {
                return Ok(StageRet::Eof);
            }
            self.remaining -= 1;
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(StageRet::Ok)
        }
    }

    #[test]
    fn pipeline_runs_every_stage_to_eof() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut p = Pipeline::new();
        p.add(Box::new(CountingStage {
            remaining: 5,
            counter: counter.clone(),
        }));
        p.add(Box::new(CountingStage {
            remaining: 3,
            counter: counter.clone(),
        }));
        p.run().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn cancellation_stops_a_never_ending_stage() {
        struct Forever;
        impl Stage for Forever {
            fn name(&self) -> &str {
                "forever"
            }
            fn work(&mut self) -> Result<StageRet> {
                Ok(StageRet::Pending)
            }
        }
        let mut p = Pipeline::new();
        p.add(Box::new(Forever));
        let cancel = p.cancel_token();
        let th = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        p.run().unwrap();
        th.join().unwrap();
    }
}
