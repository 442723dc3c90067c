use chrono::{DateTime, Utc};

/// Supplies unique edge identifiers to the graph factory.
///
/// Injected rather than ambient so that two parses of the same document
/// produce byte-identical output. The default implementation is a plain
/// per-parse counter.
pub trait IdProvider {
    fn next_id(&mut self, kind: &str) -> String;
}

/// Sequential id provider: `edge-needs-1`, `edge-needs-2`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: u64,
}

impl IdProvider for SequentialIds {
    fn next_id(&mut self, kind: &str) -> String {
        self.counter += 1;
        format!("edge-{}-{}", kind, self.counter)
    }
}

/// Supplies the analysis timestamp recorded in the parse result.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
