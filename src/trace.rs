//! Emulation trace records.
//!
//! Records are kept in memory for the whole run and mirrored to `tracing` under the `trace`
//! target. A `Begin` record stays open until a later [`TraceLog::boundary`] call carries the same
//! name, pid, category and args; that call stamps its end instead of opening a new record.

use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::info;

pub const CAT_STATE: &[&str] = &["state"];
pub const CAT_FLOW: &[&str] = &["port", "flow"];
pub const CAT_PACKET_SND: &[&str] = &["port", "packet", "packet_snd"];
pub const CAT_PACKET_RCV: &[&str] = &["port", "packet", "packet_rcv"];
pub const CAT_APP_EVENT_SND: &[&str] = &["event", "app", "event_snd"];
pub const CAT_LOCAL_EVENT_SND: &[&str] = &["event", "local", "event_snd"];
pub const CAT_APP_EVENT_RCV: &[&str] = &["event", "app", "event_rcv"];
pub const CAT_ENV_EVENT_RCV: &[&str] = &["event", "env", "event_rcv"];
pub const CAT_LOCAL_EVENT_RCV: &[&str] = &["event", "local", "event_rcv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Instant,
    Begin,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Instant => f.write_str("I"),
            Phase::Begin => f.write_str("BE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub name: String,
    pub ts: SystemTime,
    pub pid: u32,
    pub phase: Phase,
    pub category: Vec<String>,
    pub args: Vec<String>,
    pub end: Option<SystemTime>,
}

impl TraceRecord {
    pub fn has_category(&self, category: &[&str]) -> bool {
        self.category.iter().map(String::as_str).eq(category.iter().copied())
    }

    fn matches(&self, name: &str, pid: u32, category: &[&str], args: &[String]) -> bool {
        self.phase == Phase::Begin
            && self.end.is_none()
            && self.pid == pid
            && self.name == name
            && self.has_category(category)
            && self.args == args
    }
}

#[derive(Debug, Default)]
struct TraceInner {
    records: Vec<TraceRecord>,
    /// Indices into `records` of Begin records still waiting for their end.
    open: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct TraceLog {
    inner: Mutex<TraceInner>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instantaneous record.
    pub fn instant(&self, name: &str, pid: u32, category: &[&str], args: Vec<String>) {
        info!(
            target: "trace",
            record = %name,
            pid,
            ph = %Phase::Instant,
            cat = %category.join(","),
            args = ?args,
        );

        let record = TraceRecord {
            name: name.to_owned(),
            ts: SystemTime::now(),
            pid,
            phase: Phase::Instant,
            category: category.iter().map(|c| (*c).to_owned()).collect(),
            args,
            end: None,
        };
        self.inner
            .lock()
            .expect("trace lock poisoned")
            .records
            .push(record);
    }

    /// Close the matching open span, or open a new one if none matches.
    pub fn boundary(&self, name: &str, pid: u32, category: &[&str], args: Vec<String>) {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("trace lock poisoned");
        let TraceInner { records, open } = &mut *inner;

        let matched = open
            .iter()
            .position(|&idx| records[idx].matches(name, pid, category, &args));

        match matched {
            Some(slot) => {
                let idx = open.remove(slot);
                records[idx].end = Some(now);
                info!(target: "trace", record = %name, pid, ph = "E", cat = %category.join(","), args = ?args);
            }
            None => {
                info!(target: "trace", record = %name, pid, ph = "B", cat = %category.join(","), args = ?args);
                open.push(records.len());
                records.push(TraceRecord {
                    name: name.to_owned(),
                    ts: now,
                    pid,
                    phase: Phase::Begin,
                    category: category.iter().map(|c| (*c).to_owned()).collect(),
                    args,
                    end: None,
                });
            }
        }
    }

    /// Stamp every still-open span with the current time.
    pub fn close_open_spans(&self) {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("trace lock poisoned");
        let TraceInner { records, open } = &mut *inner;
        for idx in open.drain(..) {
            records[idx].end = Some(now);
        }
    }

    /// Snapshot of every record in creation order.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.inner.lock().expect("trace lock poisoned").records.clone()
    }

    /// Records carrying exactly `category`.
    pub fn with_category(&self, category: &[&str]) -> Vec<TraceRecord> {
        self.inner
            .lock()
            .expect("trace lock poisoned")
            .records
            .iter()
            .filter(|r| r.has_category(category))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trace lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
