//! In-process query sources for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{QueryError, QuerySource, RawResultSet};

pub fn table(header: &[&str], body: &[&[&str]]) -> RawResultSet {
    RawResultSet {
        columns: header.iter().map(|s| s.to_string()).collect(),
        rows: body
            .iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect(),
    }
}

/// Answers from a queue of canned responses, repeating the last one once
/// the queue runs dry.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<RawResultSet, QueryError>>>,
    last: Mutex<Result<RawResultSet, QueryError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<RawResultSet, QueryError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(Ok(RawResultSet::default())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QuerySource for ScriptedSource {
    fn fetch(&self, _sql: &str) -> Result<RawResultSet, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(response) = next {
            *last = response;
        }
        last.clone()
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Answers every query by calling a closure with the SQL text.
pub struct FnSource<F> {
    respond: F,
}

impl<F> FnSource<F>
where
    F: Fn(&str) -> Result<RawResultSet, QueryError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

impl<F> QuerySource for FnSource<F>
where
    F: Fn(&str) -> Result<RawResultSet, QueryError> + Send + Sync,
{
    fn fetch(&self, sql: &str) -> Result<RawResultSet, QueryError> {
        (self.respond)(sql)
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}
