//! Background scheduler driving reconciliation ticks.
//!
//! The scheduler is either idle or running. While running, a tokio task runs
//! a tick right away and then one tick per interval until stopped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::reconciler::{CancellationFlag, Reconciler, TickReport};
use super::store::{FeedSource, IssueStore, NotificationSink, SubscriptionStore};

struct RunningTask {
    shutdown: watch::Sender<bool>,
    cancel: CancellationFlag,
    handle: JoinHandle<()>,
}

enum State {
    Idle,
    Running(RunningTask),
}

/// Periodic reconciliation job with an explicit start/stop lifecycle.
pub struct Scheduler<S, T, I, K> {
    reconciler: Arc<Reconciler<S, T, I, K>>,
    interval: Duration,
    state: Mutex<State>,
}

impl<S, T, I, K> Scheduler<S, T, I, K>
where
    S: FeedSource + 'static,
    T: SubscriptionStore + Clone + 'static,
    I: IssueStore + 'static,
    K: NotificationSink + 'static,
{
    /// Create an idle scheduler.
    pub fn new(reconciler: Arc<Reconciler<S, T, I, K>>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            state: Mutex::new(State::Idle),
        }
    }

    /// The reconciler driven by this scheduler.
    pub fn reconciler(&self) -> &Arc<Reconciler<S, T, I, K>> {
        &self.reconciler
    }

    /// Start ticking. Must be called from within a tokio runtime.
    ///
    /// Returns false when the scheduler was already running.
    pub fn start(&self) -> bool {
        let mut state = self.state();
        if matches!(*state, State::Running(_)) {
            debug!("Scheduler already running");
            return false;
        }

        let (shutdown, receiver) = watch::channel(false);
        let cancel = CancellationFlag::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.reconciler),
            self.interval,
            receiver,
            cancel.clone(),
        ));

        *state = State::Running(RunningTask {
            shutdown,
            cancel,
            handle,
        });
        true
    }

    /// Stop ticking.
    ///
    /// Interrupts the wait for the next tick at once. A tick in progress
    /// finishes the feed it is checking, skips the rest and still dispatches
    /// what it found. Calling this while idle does nothing.
    pub fn stop(&self) {
        self.take_running();
    }

    /// Stop ticking and wait for the background task to finish.
    pub async fn stop_and_wait(&self) {
        if let Some(handle) = self.take_running() {
            if let Err(e) = handle.await {
                error!("Scheduler task failed: {}", e);
            }
        }
    }

    /// Whether the scheduler is running.
    pub fn is_running(&self) -> bool {
        matches!(*self.state(), State::Running(_))
    }

    /// Run a tick immediately, outside the schedule.
    ///
    /// Returns `None` when a tick is already in progress.
    pub async fn tick_now(&self) -> Option<TickReport> {
        self.reconciler.tick(&CancellationFlag::new()).await
    }

    fn take_running(&self) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(&mut *self.state(), State::Idle);
        match previous {
            State::Running(task) => {
                task.cancel.cancel();
                // The receiver may already be gone if the task ended.
                let _ = task.shutdown.send(true);
                Some(task.handle)
            }
            State::Idle => None,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run<S, T, I, K>(
    reconciler: Arc<Reconciler<S, T, I, K>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    cancel: CancellationFlag,
) where
    S: FeedSource,
    T: SubscriptionStore + Clone,
    I: IssueStore,
    K: NotificationSink,
{
    info!("Watch scheduler started (check interval: {:?})", interval);

    loop {
        reconciler.tick(&cancel).await;

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Watch scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::WatchConfig;
    use crate::watch::memory::{MemoryIssueStore, MemorySubscriptionStore};
    use crate::watch::test_support::{RecordingSink, ScriptedSource};
    use crate::watch::types::{FeedId, Issue};

    type TestScheduler = Scheduler<
        Arc<ScriptedSource>,
        Arc<MemorySubscriptionStore>,
        Arc<MemoryIssueStore>,
        Arc<RecordingSink>,
    >;

    fn scheduler(
        interval: Duration,
    ) -> (TestScheduler, Arc<ScriptedSource>, Arc<MemorySubscriptionStore>) {
        let source = Arc::new(ScriptedSource::new());
        let store = Arc::new(MemorySubscriptionStore::new());
        let reconciler = Reconciler::new(
            source.clone(),
            store.clone(),
            Arc::new(MemoryIssueStore::new()),
            Arc::new(RecordingSink::new()),
            &WatchConfig::default(),
        );
        (
            Scheduler::new(Arc::new(reconciler), interval),
            source,
            store,
        )
    }

    async fn wait_for_calls(source: &ScriptedSource, feed: &FeedId, calls: usize) -> bool {
        for _ in 0..200 {
            if source.call_count(feed) >= calls {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_first_tick_runs_immediately() {
        let (scheduler, source, store) = scheduler(Duration::from_secs(3600));
        let f = FeedId::parse("a/a").unwrap();
        store.subscribe(1, &f, &BTreeSet::new()).await.unwrap();
        source.set_issues(&f, vec![Issue::new(f.clone(), 1, "one")]);

        assert!(scheduler.start());
        assert!(wait_for_calls(&source, &f, 1).await);

        scheduler.stop_and_wait().await;
        assert!(!scheduler.is_running());
        assert_eq!(source.call_count(&f), 1);
    }

    #[tokio::test]
    async fn test_ticks_repeat_on_interval() {
        let (scheduler, source, store) = scheduler(Duration::from_millis(20));
        let f = FeedId::parse("a/a").unwrap();
        store.subscribe(1, &f, &BTreeSet::new()).await.unwrap();

        scheduler.start();
        assert!(wait_for_calls(&source, &f, 3).await);
        scheduler.stop_and_wait().await;

        let calls = source.call_count(&f);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.call_count(&f), calls);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (scheduler, _, _) = scheduler(Duration::from_secs(3600));
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());
        scheduler.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (scheduler, _, _) = scheduler(Duration::from_secs(3600));
        scheduler.stop();
        scheduler.stop_and_wait().await;
        assert!(!scheduler.is_running());

        scheduler.start();
        scheduler.stop();
        scheduler.stop();
        scheduler.stop_and_wait().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (scheduler, _, _) = scheduler(Duration::from_secs(3600));
        scheduler.start();
        scheduler.stop_and_wait().await;
        assert!(scheduler.start());
        assert!(scheduler.is_running());
        scheduler.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_tick_now() {
        let (scheduler, source, store) = scheduler(Duration::from_secs(3600));
        let f = FeedId::parse("a/a").unwrap();
        store.subscribe(1, &f, &BTreeSet::new()).await.unwrap();

        let report = scheduler.tick_now().await.unwrap();
        assert_eq!(report.feeds, 1);
        assert_eq!(source.call_count(&f), 1);
        assert!(!scheduler.is_running());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_start_logs_sub_second_interval() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let (scheduler, source, store) = scheduler(Duration::from_millis(250));
        let f = FeedId::parse("a/a").unwrap();
        store.subscribe(1, &f, &BTreeSet::new()).await.unwrap();
        scheduler.start();
        assert!(wait_for_calls(&source, &f, 1).await);
        scheduler.stop_and_wait().await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("check interval: 250ms"));
    }
}
