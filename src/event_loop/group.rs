//! A fixed-size group of single-threaded event loops.
//!
//! Each loop is a dedicated OS thread driving a current-thread tokio runtime
//! and a `LocalSet`. Work arrives over an unbounded channel; the loop spawns
//! it locally, so tasks never migrate between threads.

use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::error::ServerError;
use crate::event_loop::metrics::{ConnectionGuard, EventLoopMetrics};
use crate::event_loop::EventLoopChooser;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};

type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;
type Task = Box<dyn FnOnce(LoopContext) -> LocalBoxFuture + Send>;

/// What a task learns about the loop it runs on.
#[derive(Clone)]
pub struct LoopContext {
    index: usize,
    shutdown: ShutdownSignal,
}

impl LoopContext {
    /// Position of this loop in its group.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fires when the group begins shutting down.
    pub fn shutdown(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

/// A pool of event loops.
pub struct EventLoopGroup {
    name: String,
    size: usize,
    senders: Mutex<Vec<mpsc::UnboundedSender<Task>>>,
    chooser: Box<dyn EventLoopChooser>,
    metrics: Arc<dyn EventLoopMetrics>,
    shutdown: Shutdown,
    // Disconnects once every loop thread has exited.
    terminated: Mutex<std_mpsc::Receiver<()>>,
}

impl EventLoopGroup {
    /// Spawn `threads` loops named `{name}-{index}`.
    pub fn new(
        name: impl Into<String>,
        threads: usize,
        chooser: Box<dyn EventLoopChooser>,
        metrics: Arc<dyn EventLoopMetrics>,
    ) -> Result<Self, ServerError> {
        let name = name.into();
        if threads == 0 {
            return Err(ServerError::EventLoop {
                name,
                source: io::Error::new(io::ErrorKind::InvalidInput, "an event loop group needs at least one thread"),
            });
        }

        let shutdown = Shutdown::new();
        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let mut senders = Vec::with_capacity(threads);

        for index in 0..threads {
            let thread_name = format!("{name}-{index}");
            let spawn_err = |source| ServerError::EventLoop {
                name: thread_name.clone(),
                source,
            };

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(spawn_err)?;

            let (tx, rx) = mpsc::unbounded_channel::<Task>();
            let context = LoopContext {
                index,
                shutdown: shutdown.subscribe(),
            };
            let done_tx = done_tx.clone();

            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let local = LocalSet::new();
                    local.spawn_local(run_loop(rx, context));
                    rt.block_on(local);
                    drop(done_tx);
                })
                .map_err(spawn_err)?;

            senders.push(tx);
        }

        tracing::debug!(group = %name, threads, "Event loop group started");

        Ok(Self {
            name,
            size: threads,
            senders: Mutex::new(senders),
            chooser,
            metrics,
            shutdown,
            terminated: Mutex::new(done_rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of loops in the group.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn metrics(&self) -> &Arc<dyn EventLoopMetrics> {
        &self.metrics
    }

    /// Loop index the chooser would hand the next task to.
    pub fn next_loop(&self) -> usize {
        self.chooser.next_loop(self.size, self.metrics.as_ref())
    }

    /// Run a task on the loop picked by the chooser.
    ///
    /// Returns the chosen index, or `None` once the group is shutting down.
    pub fn spawn<F, Fut>(&self, task: F) -> Option<usize>
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let index = self.next_loop();
        self.spawn_on(index, task).then_some(index)
    }

    /// Run a task on a specific loop. Returns false once the group is shutting down.
    pub fn spawn_on<F, Fut>(&self, index: usize, task: F) -> bool
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let senders = self.senders();
        match senders.get(index) {
            Some(tx) => tx.send(Box::new(move |cx| Box::pin(task(cx)))).is_ok(),
            None => false,
        }
    }

    /// Hand a connection task to a loop, counting it against that loop until
    /// the task finishes.
    ///
    /// The count is taken here rather than on the loop so back-to-back
    /// assignments see each other.
    pub fn spawn_connection<F, Fut>(&self, task: F) -> Option<usize>
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let index = self.next_loop();
        let guard = ConnectionGuard::open(index, self.metrics.clone());
        self.spawn_on(index, move |cx| async move {
            let _guard = guard;
            task(cx).await;
        })
        .then_some(index)
    }

    /// Submit a no-op to every loop and block until each has run it.
    ///
    /// Must not be called from one of this group's own threads.
    pub fn sync_each(&self) -> bool {
        let (tx, rx) = std_mpsc::channel();
        let submitted = (0..self.size)
            .filter(|index| {
                let tx = tx.clone();
                self.spawn_on(*index, move |_| async move {
                    let _ = tx.send(());
                })
            })
            .count();
        drop(tx);

        submitted == self.size && rx.iter().take(submitted).count() == submitted
    }

    /// Stop accepting tasks and signal running loops to wind down.
    ///
    /// In-flight tasks are allowed to finish. Idempotent.
    pub fn shutdown_gracefully(&self) {
        self.shutdown.trigger();
        self.senders().clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Block until every loop thread has exited or `timeout` elapses.
    ///
    /// Returns true when the group terminated in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let terminated = self.terminated.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match terminated.recv_timeout(remaining) {
                Ok(()) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return true,
                Err(std_mpsc::RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    fn senders(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Task>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.shutdown_gracefully();
    }
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Task>, context: LoopContext) {
    while let Some(task) = rx.recv().await {
        let fut = task(context.clone());
        let index = context.index;
        tokio::task::spawn_local(async move {
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                tracing::error!(event_loop = index, "Uncaught panic in event loop task");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event_loop::metrics::ConnectionCounters;
    use crate::event_loop::round_robin::RoundRobin;

    fn group(threads: usize) -> (EventLoopGroup, Arc<ConnectionCounters>) {
        let counters = Arc::new(ConnectionCounters::new());
        let group = EventLoopGroup::new("test-loop", threads, Box::new(RoundRobin::new()), counters.clone()).unwrap();
        (group, counters)
    }

    #[test]
    fn zero_threads_rejected() {
        let err = EventLoopGroup::new(
            "empty",
            0,
            Box::new(RoundRobin::new()),
            Arc::new(ConnectionCounters::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::EventLoop { .. }));
    }

    #[test]
    fn tasks_run_on_named_threads() {
        let (group, _) = group(2);
        let (tx, rx) = std_mpsc::channel();
        for _ in 0..2 {
            let tx = tx.clone();
            group.spawn(move |cx| async move {
                let name = thread::current().name().map(str::to_owned);
                tx.send((cx.index(), name)).unwrap();
            });
        }

        let mut seen: Vec<_> = rx.iter().take(2).collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (0, Some("test-loop-0".to_string())),
                (1, Some("test-loop-1".to_string())),
            ]
        );
    }

    #[test]
    fn sync_each_reaches_every_loop() {
        let (group, _) = group(3);
        assert!(group.sync_each());
        group.shutdown_gracefully();
        assert!(!group.sync_each());
    }

    #[test]
    fn panicking_task_does_not_kill_loop() {
        let (group, _) = group(1);
        group.spawn_on(0, |_| async { panic!("boom") });
        assert!(group.sync_each());
    }

    #[test]
    fn connection_count_released_when_task_ends() {
        let (group, counters) = group(1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        assert_eq!(group.spawn_connection(move |_| async move {
            let _ = release_rx.await;
        }), Some(0));
        assert_eq!(counters.active_connections(0), 1);

        release_tx.send(()).unwrap();
        assert!(group.sync_each());
        // The connection task finished before the barrier task ran.
        assert!(group.sync_each());
        assert_eq!(counters.active_connections(0), 0);
    }

    #[test]
    fn graceful_shutdown_lets_in_flight_tasks_finish() {
        let (group, _) = group(2);
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let finished = finished.clone();
            group.spawn(move |_| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        group.shutdown_gracefully();
        assert!(group.await_termination(Duration::from_secs(5)));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert!(group.spawn(|_| async {}).is_none());
    }

    #[test]
    fn termination_wait_is_bounded() {
        let (group, _) = group(1);
        group.spawn(|cx| async move {
            // ignores the shutdown signal on purpose
            let _ = cx;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(group.sync_each());

        group.shutdown_gracefully();
        let started = Instant::now();
        assert!(!group.await_termination(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
