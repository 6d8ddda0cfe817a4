//! In-process sources for exercising the service without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use folio_core::{
    CacheKey, FolioError, Point, Result, SeriesSource, SessionContext, SourceKind,
    TimeSeriesRecord,
};

/// Scripted reply for one call.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Build `n` consecutive points on the key's grid.
    Points(usize),
    Fail(FolioError),
    Panic,
}

/// A source answering from a script, counting calls.
///
/// When the script runs out the last reply repeats.
#[derive(Debug)]
pub(crate) struct ScriptedSource {
    kind: SourceKind,
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Reply>,
    delay: Duration,
    requires_session: bool,
    calls: AtomicU32,
    sessions_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub(crate) fn new(kind: SourceKind, script: impl IntoIterator<Item = Reply>) -> Self {
        let script: VecDeque<Reply> = script.into_iter().collect();
        let last = script.back().cloned().unwrap_or(Reply::Points(1));
        Self {
            kind,
            script: Mutex::new(script),
            last: Mutex::new(last),
            delay: Duration::ZERO,
            requires_session: true,
            calls: AtomicU32::new(0),
            sessions_seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn portfolio(script: impl IntoIterator<Item = Reply>) -> Self {
        Self::new(SourceKind::Portfolio, script)
    }

    pub(crate) fn benchmark(script: impl IntoIterator<Item = Reply>) -> Self {
        let mut source = Self::new(SourceKind::Benchmark, script);
        source.requires_session = false;
        source
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_seen(&self) -> Vec<Option<String>> {
        self.sessions_seen.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(reply) => {
                *self.last.lock().unwrap() = reply.clone();
                reply
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

/// Start of the synthetic series, a Monday.
pub(crate) fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `n` points on `key`'s grid starting at [`origin`], value 100 + i.
pub(crate) fn record(key: &CacheKey, n: usize) -> TimeSeriesRecord {
    let step = key.interval().step();
    let points = (0..n)
        .map(|i| Point::new(origin() + step * i as i32, 100.0 + i as f64))
        .collect();
    TimeSeriesRecord::new(key.clone(), Utc::now(), points).unwrap()
}

#[async_trait]
impl SeriesSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn requires_session(&self) -> bool {
        self.requires_session
    }

    async fn fetch(&self, session: &SessionContext, key: &CacheKey) -> Result<TimeSeriesRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sessions_seen
            .lock()
            .unwrap()
            .push(session.access_token().map(str::to_string));
        let reply = self.next_reply();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match reply {
            Reply::Points(n) => Ok(record(key, n)),
            Reply::Fail(e) => Err(e),
            Reply::Panic => panic!("scripted panic"),
        }
    }
}
