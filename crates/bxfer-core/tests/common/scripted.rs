//! In-memory multiplexer driven by per-request scripts.
//!
//! Each request carries a list of steps, one per attempt (the last step
//! repeats). The multiplexer "performs" an attempt once its latency has
//! elapsed: it drains the payload from the current cursor, appends the
//! scripted body to the response and records what happened in a shared
//! [`Tracker`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bxfer_core::transfer::{Payload, ResponseBuffer};
use bxfer_core::transport::{Completion, Exchange, Multiplexer, TransportError};

#[derive(Debug, Clone)]
pub enum Step {
    Respond { status: u32, body: Vec<u8> },
    /// Transport-level failure (no status).
    Fail(String),
    /// Never completes.
    Stall,
}

pub fn ok(body: &str) -> Step {
    Step::Respond {
        status: 200,
        body: body.as_bytes().to_vec(),
    }
}

pub fn status(code: u32) -> Step {
    Step::Respond {
        status: code,
        body: format!("status {}", code).into_bytes(),
    }
}

/// What the multiplexer observed, per token.
#[derive(Debug, Default)]
pub struct Record {
    /// Start of every attempt (registration time).
    pub attempts: Vec<Instant>,
    /// When each attempt finished with a transient status.
    pub failures: Vec<Instant>,
    /// Payload bytes drained by each performed attempt.
    pub sent: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct TrackerState {
    pub records: HashMap<usize, Record>,
    pub waits: Vec<Duration>,
    pub dropped: usize,
    pub registered_now: usize,
    pub max_registered: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Tracker(Arc<Mutex<TrackerState>>);

impl Tracker {
    pub fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.0.lock().unwrap()
    }

    pub fn attempts(&self, token: usize) -> usize {
        self.lock().records.get(&token).map(|r| r.attempts.len()).unwrap_or(0)
    }

    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }
}

pub struct ScriptedRequest {
    steps: Vec<Step>,
    latency: Duration,
    attempt: usize,
    payload: Payload,
    response: ResponseBuffer,
    last_status: Option<u32>,
    tracker: Tracker,
}

impl ScriptedRequest {
    pub fn new(tracker: &Tracker, steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty());
        Self {
            steps,
            latency: Duration::ZERO,
            attempt: 0,
            payload: Payload::default(),
            response: ResponseBuffer::new(),
            last_status: None,
            tracker: tracker.clone(),
        }
    }

    pub fn with_payload(mut self, bytes: &[u8]) -> Self {
        self.payload = Payload::new(bytes.to_vec());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn current_step(&self) -> &Step {
        let i = self.attempt.saturating_sub(1).min(self.steps.len() - 1);
        &self.steps[i]
    }
}

impl Drop for ScriptedRequest {
    fn drop(&mut self) {
        if let Ok(mut t) = self.tracker.0.lock() {
            t.dropped += 1;
        }
    }
}

impl Exchange for ScriptedRequest {
    fn rewind(&mut self) {
        self.payload.rewind();
        self.response.clear();
        self.last_status = None;
    }

    fn status(&mut self) -> Result<u32, TransportError> {
        self.last_status
            .ok_or_else(|| TransportError::Other("no status recorded".into()))
    }

    fn take_response(&mut self) -> Vec<u8> {
        self.response.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptedHandle(u64);

struct InFlight {
    token: usize,
    request: ScriptedRequest,
    ready_at: Instant,
    done: bool,
}

/// Multiplexer stub. `hint` is what `suggested_wait` reports.
pub struct ScriptedMux {
    tracker: Tracker,
    hint: Option<Duration>,
    next_id: u64,
    in_flight: HashMap<u64, InFlight>,
    finished: VecDeque<Completion>,
    bogus_token: Option<usize>,
}

impl ScriptedMux {
    pub fn new(tracker: &Tracker) -> Self {
        Self {
            tracker: tracker.clone(),
            hint: None,
            next_id: 0,
            in_flight: HashMap::new(),
            finished: VecDeque::new(),
            bogus_token: None,
        }
    }

    pub fn with_hint(mut self, hint: Duration) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Report a completion for `token` on the first harvest, whether or not
    /// it is registered.
    pub fn with_bogus_token(mut self, token: usize) -> Self {
        self.bogus_token = Some(token);
        self
    }

    pub fn registered(&self) -> usize {
        self.in_flight.len()
    }

    fn next_ready(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .filter(|f| !f.done && !matches!(f.request.current_step(), Step::Stall))
            .map(|f| f.ready_at)
            .min()
    }
}

impl Multiplexer for ScriptedMux {
    type Request = ScriptedRequest;
    type Handle = ScriptedHandle;

    fn register(
        &mut self,
        token: usize,
        mut request: ScriptedRequest,
    ) -> Result<ScriptedHandle, TransportError> {
        let now = Instant::now();
        request.attempt += 1;
        {
            let mut t = self.tracker.lock();
            t.records.entry(token).or_default().attempts.push(now);
            t.registered_now += 1;
            t.max_registered = t.max_registered.max(t.registered_now);
        }
        let id = self.next_id;
        self.next_id += 1;
        let ready_at = now + request.latency;
        self.in_flight.insert(
            id,
            InFlight {
                token,
                request,
                ready_at,
                done: false,
            },
        );
        Ok(ScriptedHandle(id))
    }

    fn deregister(&mut self, handle: ScriptedHandle) -> Result<ScriptedRequest, TransportError> {
        let f = self
            .in_flight
            .remove(&handle.0)
            .ok_or_else(|| TransportError::Other(format!("unknown handle {}", handle.0)))?;
        self.tracker.lock().registered_now -= 1;
        Ok(f.request)
    }

    fn suggested_wait(&self) -> Option<Duration> {
        self.hint
    }

    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.tracker.lock().waits.push(timeout);
        let sleep = match self.next_ready() {
            Some(at) => timeout.min(at.saturating_duration_since(Instant::now())),
            None => timeout,
        };
        std::thread::sleep(sleep);
        Ok(())
    }

    fn step(&mut self) -> Result<usize, TransportError> {
        let now = Instant::now();
        let mut running = 0;
        for f in self.in_flight.values_mut() {
            if f.done {
                continue;
            }
            let step = f.request.current_step().clone();
            if matches!(step, Step::Stall) || f.ready_at > now {
                running += 1;
                continue;
            }
            let mut sent = Vec::new();
            let mut chunk = [0u8; 3];
            loop {
                let n = f.request.payload.fill(&mut chunk);
                if n == 0 {
                    break;
                }
                sent.extend_from_slice(&chunk[..n]);
            }
            let mut t = self.tracker.lock();
            let record = t.records.entry(f.token).or_default();
            record.sent.push(sent);
            let result = match step {
                Step::Respond { status, body } => {
                    f.request.response.append(&body);
                    f.request.last_status = Some(status);
                    if status == 503 {
                        record.failures.push(now);
                    }
                    Ok(())
                }
                Step::Fail(msg) => Err(TransportError::Other(msg)),
                Step::Stall => unreachable!(),
            };
            f.done = true;
            self.finished.push_back(Completion {
                token: f.token,
                result,
            });
        }
        Ok(running)
    }

    fn harvest(&mut self) -> Result<Vec<Completion>, TransportError> {
        let mut out: Vec<Completion> = self.finished.drain(..).collect();
        if let Some(token) = self.bogus_token.take() {
            out.push(Completion {
                token,
                result: Ok(()),
            });
        }
        Ok(out)
    }
}
