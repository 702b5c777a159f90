//! One timer-driven refresh task per view.
//!
//! Each loop cycles `Idle -> Querying -> Committing -> Idle` until the
//! render side goes away. Queries run on tokio's blocking pool, so a slow
//! view only ever delays itself; the shared connection decides on its own
//! how concurrent callers are handled.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::bridge::UiSender;
use super::buffer::{BufferSnapshot, RefreshOutcome};
use super::sizer::TextMeasure;
use super::{ViewId, ViewRegistry, ViewSpec};
use crate::db::{QueryError, QueryExecutor};

pub type SharedMeasure = Arc<dyn TextMeasure + Send + Sync>;

/// Requests an out-of-band refresh of one view.
#[derive(Clone, Default)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    /// Runs the same routine as the timer, in the view's own loop. Requests
    /// made while a tick is in flight coalesce into a single follow-up tick.
    pub fn request_refresh(&self) {
        self.notify.notify_one();
    }
}

pub struct RefreshLoop {
    spec: Arc<ViewSpec>,
    executor: Arc<QueryExecutor>,
    measure: SharedMeasure,
    bridge: UiSender<ViewRegistry>,
    manual: RefreshHandle,
}

impl RefreshLoop {
    pub fn new(
        spec: Arc<ViewSpec>,
        executor: Arc<QueryExecutor>,
        measure: SharedMeasure,
        bridge: UiSender<ViewRegistry>,
    ) -> Self {
        Self {
            spec,
            executor,
            measure,
            bridge,
            manual: RefreshHandle::default(),
        }
    }

    pub fn handle(&self) -> RefreshHandle {
        self.manual.clone()
    }

    /// Tick immediately, then on every interval or manual request. Returns
    /// once the render side stops accepting updates.
    pub async fn run(self) {
        info!(
            "Starting refresher for '{}' / '{}' every {:?}",
            self.spec.group_title, self.spec.title, self.spec.interval
        );

        let mut interval = tokio::time::interval(self.spec.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let manual = tokio::select! {
                biased;
                _ = self.manual.notify.notified() => {
                    debug!("Manual refresh requested for '{}'", self.spec.title);
                    true
                }
                _ = interval.tick() => false,
            };

            if self.bridge.is_closed() || !self.tick().await {
                debug!("Render side closed, stopping refresher for '{}'", self.spec.title);
                break;
            }

            // A manual tick restarts the schedule
            if manual {
                interval.reset();
            }
        }
    }

    /// Query, size and commit once. Returns whether the commit was accepted.
    pub async fn tick(&self) -> bool {
        let executor = Arc::clone(&self.executor);
        let measure = Arc::clone(&self.measure);
        let query = self.spec.query.clone();

        let queried = tokio::task::spawn_blocking(move || {
            executor
                .execute(&query)
                .map(|result| (BufferSnapshot::new(&result, measure.as_ref()), result.execution_time_ms))
        })
        .await
        .unwrap_or_else(|e| Err(QueryError::Aborted(e.to_string())));

        let outcome = match queried {
            Ok((snapshot, elapsed_ms)) => {
                debug!(
                    "Refreshed '{}': {} rows in {}ms",
                    self.spec.title,
                    snapshot.rows().len().saturating_sub(1),
                    elapsed_ms
                );
                RefreshOutcome::Success {
                    snapshot,
                    at: Local::now(),
                }
            }
            Err(e) => {
                warn!("Error executing query for view '{}': {}", self.spec.title, e);
                RefreshOutcome::Failure {
                    message: e.to_string(),
                }
            }
        };

        let id = self.spec.id;
        self.bridge.post(move |registry: &mut ViewRegistry| {
            if let Some(buffer) = registry.buffer_mut(id) {
                buffer.apply(outcome);
            }
        })
    }
}

/// Start one loop per registered view on `runtime`.
pub fn spawn_all(
    registry: &ViewRegistry,
    executor: Arc<QueryExecutor>,
    measure: SharedMeasure,
    bridge: &UiSender<ViewRegistry>,
    runtime: &Handle,
) -> (HashMap<ViewId, RefreshHandle>, Vec<JoinHandle<()>>) {
    let mut handles = HashMap::with_capacity(registry.len());
    let mut tasks = Vec::with_capacity(registry.len());

    for spec in registry.specs() {
        let refresh = RefreshLoop::new(
            Arc::clone(spec),
            Arc::clone(&executor),
            Arc::clone(&measure),
            bridge.clone(),
        );
        handles.insert(spec.id, refresh.handle());
        tasks.push(runtime.spawn(refresh.run()));
    }

    info!("Spawned {} refreshers", tasks.len());
    (handles, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RowShapePolicy;
    use crate::db::fixtures::{table, FnSource, ScriptedSource};
    use crate::db::{QuerySource, RawResultSet};
    use crate::monitor::bridge::{self, UiReceiver};
    use crate::monitor::sizer::TerminalMeasure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::time::timeout;

    const PATIENCE: Duration = Duration::from_secs(5);

    struct Harness {
        registry: ViewRegistry,
        rx: UiReceiver<ViewRegistry>,
        tx: UiSender<ViewRegistry>,
    }

    fn harness(interval: Duration) -> (Harness, ViewId) {
        let (registry, id) = ViewRegistry::with_view("users", "SELECT * FROM users", interval);
        let (tx, rx) = bridge::channel();
        (Harness { registry, rx, tx }, id)
    }

    fn refresher(h: &Harness, id: ViewId, source: Arc<dyn QuerySource>) -> RefreshLoop {
        refresher_with_policy(h, id, source, RowShapePolicy::DropMismatched)
    }

    fn refresher_with_policy(
        h: &Harness,
        id: ViewId,
        source: Arc<dyn QuerySource>,
        policy: RowShapePolicy,
    ) -> RefreshLoop {
        let spec = Arc::clone(&h.registry.view(id).unwrap().spec);
        let executor = Arc::new(QueryExecutor::new(source, policy));
        RefreshLoop::new(spec, executor, Arc::new(TerminalMeasure), h.tx.clone())
    }

    fn strings(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_first_tick_populates_buffer() {
        let (mut h, id) = harness(Duration::from_secs(60));
        let source = Arc::new(ScriptedSource::new(vec![Ok(table(&["id", "name"], &[&["1", "Alice"]]))]));
        let refresh = refresher(&h, id, source);

        assert!(refresh.tick().await);
        assert_eq!(h.rx.drain(&mut h.registry), 1);

        let buffer = h.registry.buffer(id).unwrap();
        assert_eq!(buffer.rows(), strings(&[&["id", "name"], &["1", "Alice"]]).as_slice());
        assert_eq!(buffer.column_widths().len(), 2);
        assert_eq!(buffer.status(), "");
        assert!(buffer.last_updated().is_some());
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_rows() {
        let (mut h, id) = harness(Duration::from_secs(60));
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(table(&["id", "name"], &[&["1", "Alice"], &["2", "Bob"]])),
            Err(QueryError::Execution("connection reset".to_string())),
        ]));
        let refresh = refresher(&h, id, source);

        refresh.tick().await;
        h.rx.drain(&mut h.registry);
        let before = h.registry.buffer(id).unwrap().rows().to_vec();

        refresh.tick().await;
        h.rx.drain(&mut h.registry);

        let buffer = h.registry.buffer(id).unwrap();
        assert_eq!(buffer.rows(), before.as_slice());
        assert_eq!(buffer.status(), "Error: connection reset");
    }

    #[tokio::test]
    async fn test_rejected_ragged_result_keeps_previous_rows() {
        let (mut h, id) = harness(Duration::from_secs(60));
        let ragged = RawResultSet {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec!["1".to_string(), "Bob".to_string()],
                vec!["2".to_string()],
            ],
        };
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(table(&["id", "name"], &[&["1", "Alice"]])),
            Ok(ragged),
        ]));
        let refresh = refresher_with_policy(&h, id, source, RowShapePolicy::Reject);

        refresh.tick().await;
        h.rx.drain(&mut h.registry);
        let before = h.registry.buffer(id).unwrap().rows().to_vec();
        let widths_before = h.registry.buffer(id).unwrap().column_widths().to_vec();

        assert!(refresh.tick().await);
        h.rx.drain(&mut h.registry);

        let buffer = h.registry.buffer(id).unwrap();
        assert_eq!(buffer.rows(), before.as_slice());
        assert_eq!(buffer.rows(), strings(&[&["id", "name"], &["1", "Alice"]]).as_slice());
        assert_eq!(buffer.column_widths(), widths_before.as_slice());
        assert_eq!(
            buffer.status(),
            "Error: malformed result: row 2 has 1 cells, header has 2"
        );
    }

    #[tokio::test]
    async fn test_schema_change_between_ticks_resizes_widths() {
        let (mut h, id) = harness(Duration::from_secs(60));
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(table(&["a", "b", "c"], &[&["1", "2", "3"]])),
            Ok(table(&["a", "b"], &[&["1", "2"]])),
        ]));
        let refresh = refresher(&h, id, source);

        refresh.tick().await;
        h.rx.drain(&mut h.registry);
        assert_eq!(h.registry.buffer(id).unwrap().column_widths().len(), 3);

        refresh.tick().await;
        h.rx.drain(&mut h.registry);
        assert_eq!(h.registry.buffer(id).unwrap().column_widths().len(), 2);
    }

    #[tokio::test]
    async fn test_run_ticks_immediately_and_then_on_schedule() {
        let (mut h, id) = harness(Duration::from_millis(30));
        let source = Arc::new(ScriptedSource::new(vec![Ok(table(&["n"], &[&["1"]]))]));
        let refresh = refresher(&h, id, source.clone());
        let started = Instant::now();
        let task = tokio::spawn(refresh.run());

        // Startup tick arrives well before the first interval elapses twice
        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        assert_eq!(h.registry.buffer(id).unwrap().dimensions(), (2, 1));

        for _ in 0..2 {
            assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        }
        assert!(source.calls() >= 3);
        assert!(started.elapsed() >= Duration::from_millis(60));

        task.abort();
    }

    #[tokio::test]
    async fn test_manual_refresh_runs_out_of_band() {
        let (mut h, id) = harness(Duration::from_secs(3600));
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(table(&["n"], &[&["1"]])),
            Ok(table(&["n"], &[&["2"]])),
        ]));
        let refresh = refresher(&h, id, source.clone());
        let handle = refresh.handle();
        let task = tokio::spawn(refresh.run());

        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        assert_eq!(h.registry.buffer(id).unwrap().cell(1, 0), Some("1"));

        handle.request_refresh();
        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        assert_eq!(h.registry.buffer(id).unwrap().cell(1, 0), Some("2"));
        assert_eq!(source.calls(), 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_manual_refresh_restarts_the_schedule() {
        let period = Duration::from_millis(1000);
        let (mut h, id) = harness(period);
        let source = Arc::new(ScriptedSource::new(vec![Ok(table(&["n"], &[&["1"]]))]));
        let refresh = refresher(&h, id, source.clone());
        let handle = refresh.handle();
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(refresh.run());

        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        tokio::time::sleep_until(started + Duration::from_millis(300)).await;
        handle.request_refresh();
        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());

        // The original deadline at 1000ms has been pushed back to ~1300ms
        tokio::time::sleep_until(started + Duration::from_millis(1150)).await;
        assert_eq!(source.calls(), 2);

        assert!(timeout(PATIENCE, h.rx.apply_next(&mut h.registry)).await.unwrap());
        assert_eq!(source.calls(), 3);

        task.abort();
    }

    #[tokio::test]
    async fn test_loop_stops_when_render_side_is_gone() {
        let (h, id) = harness(Duration::from_millis(10));
        let source = Arc::new(ScriptedSource::new(vec![Ok(table(&["n"], &[&["1"]]))]));
        let refresh = refresher(&h, id, source);
        let Harness { registry, rx, tx } = h;
        drop((registry, rx, tx));

        let task = tokio::spawn(refresh.run());
        timeout(PATIENCE, task).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_view_does_not_delay_fast_view() {
        let (tx, mut rx) = bridge::channel::<ViewRegistry>();
        let (mut registry, slow_id) =
            ViewRegistry::with_view("slow", "SELECT slow", Duration::from_secs(3600));
        let (fast_registry, _) = ViewRegistry::with_view("fast", "SELECT fast", Duration::from_millis(20));
        // Graft the fast view onto the same registry under a fresh id
        let fast_spec = fast_registry.specs().next().unwrap();
        let fast_id = registry.push_view(ViewSpec::clone(fast_spec));

        let slow_source = Arc::new(
            ScriptedSource::new(vec![Ok(table(&["s"], &[&["slow"]]))]).with_delay(Duration::from_secs(2)),
        );
        let fast_source = Arc::new(ScriptedSource::new(vec![Ok(table(&["f"], &[&["fast"]]))]));

        let build = |id: ViewId, source: Arc<dyn QuerySource>| {
            let spec = Arc::clone(&registry.view(id).unwrap().spec);
            let executor = Arc::new(QueryExecutor::new(source, RowShapePolicy::DropMismatched));
            RefreshLoop::new(spec, executor, Arc::new(TerminalMeasure), tx.clone())
        };
        let slow = tokio::spawn(build(slow_id, slow_source.clone() as Arc<dyn QuerySource>).run());
        let fast = tokio::spawn(build(fast_id, fast_source.clone() as Arc<dyn QuerySource>).run());

        let mut fast_commits = 0;
        while fast_commits < 3 {
            assert!(timeout(Duration::from_secs(1), rx.apply_next(&mut registry)).await.unwrap());
            if registry.buffer(fast_id).unwrap().rows().len() == 2 {
                fast_commits += 1;
            }
        }

        // The slow view is still stuck in its first query
        assert!(registry.buffer(slow_id).unwrap().rows().is_empty());
        assert_eq!(slow_source.calls(), 1);
        assert!(fast_source.calls() >= 3);

        slow.abort();
        fast.abort();
    }

    /// Every cell of generation `n` holds `n`, and the column count varies
    /// with the generation, so a half-applied buffer would be detectable.
    fn generation_table(generation: usize) -> RawResultSet {
        let columns = generation % 4 + 1;
        let rows = generation % 5;
        let cell = generation.to_string();
        RawResultSet {
            columns: (0..columns).map(|c| format!("c{c}_{generation}")).collect(),
            rows: vec![vec![cell; columns]; rows],
        }
    }

    fn assert_consistent(registry: &ViewRegistry, id: ViewId) {
        let buffer = registry.buffer(id).unwrap();
        let (row_count, col_count) = buffer.dimensions();
        if row_count == 0 {
            assert!(buffer.column_widths().is_empty());
            return;
        }
        assert_eq!(buffer.column_widths().len(), col_count);

        let header = &buffer.rows()[0];
        let generation = header[0].rsplit('_').next().unwrap().to_string();
        assert_eq!(col_count, generation.parse::<usize>().unwrap() % 4 + 1);
        for row in &buffer.rows()[1..] {
            assert_eq!(row.len(), col_count);
            assert!(row.iter().all(|cell| *cell == generation));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_are_never_torn() {
        let (tx, mut rx) = bridge::channel::<ViewRegistry>();
        let mut registry = ViewRegistry::default();
        let ids: Vec<ViewId> = (0..2)
            .map(|n| {
                registry.push_view(ViewSpec {
                    id: ViewId::new(0),
                    group_title: "g".to_string(),
                    title: format!("v{n}"),
                    query: format!("SELECT {n}"),
                    interval: Duration::from_millis(1),
                })
            })
            .collect();

        let counter = Arc::new(AtomicUsize::new(0));
        let source: Arc<dyn QuerySource> = {
            let counter = Arc::clone(&counter);
            Arc::new(FnSource::new(move |_sql: &str| {
                Ok(generation_table(counter.fetch_add(1, Ordering::SeqCst)))
            }))
        };
        let executor = Arc::new(QueryExecutor::new(source, RowShapePolicy::Reject));

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let spec = Arc::clone(&registry.view(*id).unwrap().spec);
                let refresh = RefreshLoop::new(spec, Arc::clone(&executor), Arc::new(TerminalMeasure), tx.clone());
                tokio::spawn(refresh.run())
            })
            .collect();

        for _ in 0..200 {
            assert!(timeout(PATIENCE, rx.apply_next(&mut registry)).await.unwrap());
            for id in &ids {
                assert_consistent(&registry, *id);
            }
        }

        for task in tasks {
            task.abort();
        }
    }
}
