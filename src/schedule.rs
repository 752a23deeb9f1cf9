use std::{collections::VecDeque, io, num::NonZeroU64};

use thiserror::Error;

use crate::{
    cache::IsCache,
    classify::OWNER_MARK,
    replace::InvariantError,
    snapshot::Sink,
    trace::TraceError,
};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("cache bookkeeping broke: {0}")]
    Invariant(#[from] InvariantError),
    #[error("cannot write snapshot: {0}")]
    Sink(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    A,
    B,
}

/// Per-set event quotas of one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub a: u64,
    pub b: u64,
}

/// Pulls up to `quota` addresses; the flag reports whether the stream ran dry.
fn fill<I>(stream: &mut I, quota: u64) -> Result<(VecDeque<u64>, bool), TraceError>
where
    I: Iterator<Item = Result<u64, TraceError>>,
{
    let want = usize::try_from(quota).unwrap_or(usize::MAX);
    let pending = stream.by_ref().take(want).collect::<Result<VecDeque<_>, _>>()?;
    let dry = pending.len() < want;
    Ok((pending, dry))
}

/// Feeds merged address streams through a cache and snapshots it every
/// `step` observed events.
pub struct Scheduler<'a> {
    cache: &'a mut dyn IsCache,
    sink: &'a mut dyn Sink,
    step: NonZeroU64,
    events: u64,
    state: State,
}

impl<'a> Scheduler<'a> {
    pub fn new(cache: &'a mut dyn IsCache, sink: &'a mut dyn Sink, step: NonZeroU64) -> Self {
        Scheduler {
            cache,
            sink,
            step,
            events: 0,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Observed events processed so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    fn start(&mut self) {
        assert_eq!(self.state, State::Idle, "a scheduler runs once");
        self.state = State::Running;
    }

    fn process(&mut self, stream: Stream, addr: u64) -> Result<(), RunError> {
        let addr = match stream {
            Stream::A => addr.wrapping_add(OWNER_MARK),
            Stream::B => addr,
        };
        self.process_marked(addr)
    }

    fn process_marked(&mut self, addr: u64) -> Result<(), RunError> {
        if self.cache.access(addr)?.is_none() {
            return Ok(());
        }
        if self.events % self.step.get() == 0 {
            self.sink.record(&self.cache.snapshot(self.events))?;
        }
        self.events += 1;
        Ok(())
    }

    /// Processes one stream whose addresses already carry the owner mark.
    pub fn run_single<I>(&mut self, trace: I) -> Result<(), RunError>
    where
        I: Iterator<Item = Result<u64, TraceError>>,
    {
        self.start();
        for addr in trace {
            self.process_marked(addr?)?;
        }
        self.state = State::Drained;
        Ok(())
    }

    /// One A event, up to `ratio - 1` more A events, then one B event, for
    /// as long as both streams yield a line at the top of the round.
    ///
    /// B is only read once A produced a line, so when B runs dry the A line
    /// read in that round is dropped unprocessed.
    pub fn run_fixed_ratio<A, B>(&mut self, mut a: A, mut b: B, ratio: u32) -> Result<(), RunError>
    where
        A: Iterator<Item = Result<u64, TraceError>>,
        B: Iterator<Item = Result<u64, TraceError>>,
    {
        self.start();
        loop {
            let Some(first) = a.next().transpose()? else {
                break;
            };
            let Some(other) = b.next().transpose()? else {
                log::debug!("stream B drained after {} events", self.events);
                break;
            };

            self.process(Stream::A, first)?;
            for _ in 1..ratio {
                match a.next().transpose()? {
                    Some(addr) => self.process(Stream::A, addr)?,
                    None => break,
                }
            }
            self.process(Stream::B, other)?;
        }
        self.state = State::Drained;
        Ok(())
    }

    /// Interleaves each interval's quotas in random order, weighting every
    /// draw by the events each side still has pending in the interval.
    pub fn run_proportional<A, B>(
        &mut self,
        mut a: A,
        mut b: B,
        quotas: &[Quota],
        rng: &mut fastrand::Rng,
    ) -> Result<(), RunError>
    where
        A: Iterator<Item = Result<u64, TraceError>>,
        B: Iterator<Item = Result<u64, TraceError>>,
    {
        self.start();
        for (interval, quota) in quotas.iter().enumerate() {
            let (mut pending_a, dry_a) = fill(&mut a, quota.a)?;
            let (mut pending_b, dry_b) = fill(&mut b, quota.b)?;
            log::debug!(
                "interval {interval}: {} of {} A events, {} of {} B events",
                pending_a.len(),
                quota.a,
                pending_b.len(),
                quota.b
            );
            if dry_a || dry_b {
                log::warn!("interval {interval}: a stream ran dry before its quota");
            }

            while !pending_a.is_empty() && !pending_b.is_empty() {
                let left_a = pending_a.len() as u64;
                let left_b = pending_b.len() as u64;
                let (stream, pending) = if rng.u64(0..left_a + left_b) < left_a {
                    (Stream::A, &mut pending_a)
                } else {
                    (Stream::B, &mut pending_b)
                };
                if let Some(addr) = pending.pop_front() {
                    self.process(stream, addr)?;
                }
            }
            for addr in pending_a.drain(..) {
                self.process(Stream::A, addr)?;
            }
            for addr in pending_b.drain(..) {
                self.process(Stream::B, addr)?;
            }

            if dry_a && dry_b {
                break;
            }
        }
        self.state = State::Drained;
        Ok(())
    }
}
