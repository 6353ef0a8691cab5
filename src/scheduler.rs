//! Periodic and signal driven sync scheduling
//!
//! Triggers from the interval ticker and the reload signal go through a
//! [`TriggerQueue`] with a single slot. A trigger that arrives while one is
//! already queued is dropped, so bursts collapse into one extra cycle. A single
//! worker drains the queue, which keeps cycles strictly serial.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why a cycle was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Interval,
    Reload,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Interval => write!(f, "interval"),
            Trigger::Reload => write!(f, "reload"),
        }
    }
}

/// Sending half of the single-slot trigger queue
#[derive(Debug, Clone)]
pub struct TriggerQueue {
    tx: mpsc::Sender<Trigger>,
}

/// Receiving half, owned by the worker
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<Trigger>,
}

impl TriggerQueue {
    pub fn channel() -> (Self, TriggerReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, TriggerReceiver { rx })
    }

    /// Queue a cycle. Returns false if one was already pending.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(trigger = %trigger, "Sync already pending, dropping trigger");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl TriggerReceiver {
    pub async fn recv(&mut self) -> Option<Trigger> {
        self.rx.recv().await
    }
}

/// Queue a trigger every `period`, starting one period from now
pub fn spawn_ticker(queue: TriggerQueue, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(period) else {
            warn!(period = ?period, "Sync interval too large, periodic sync disabled");
            return;
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if queue.tx.is_closed() {
                break;
            }
            queue.trigger(Trigger::Interval);
        }
    })
}

/// Queue a trigger on every SIGHUP
#[cfg(unix)]
pub fn spawn_reload_listener(queue: TriggerQueue) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, scheduling sync");
            if queue.tx.is_closed() {
                break;
            }
            queue.trigger(Trigger::Reload);
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_queue: TriggerQueue) -> std::io::Result<JoinHandle<()>> {
    warn!("Reload signal not supported on this platform");
    Ok(tokio::spawn(async {}))
}

/// Run `cycle` once per received trigger until the queue closes or
/// `shutdown` resolves. A running cycle is always allowed to finish.
pub async fn run_worker<C, Fut, S>(mut triggers: TriggerReceiver, mut cycle: C, shutdown: S)
where
    C: FnMut(Trigger) -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let trigger = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping sync worker");
                break;
            }
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };

        debug!(trigger = %trigger, "Running sync cycle");
        cycle(trigger).await;
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_queue_collapses_bursts() {
        let (queue, mut rx) = TriggerQueue::channel();

        assert!(queue.trigger(Trigger::Startup));
        assert!(!queue.trigger(Trigger::Interval));
        assert!(!queue.trigger(Trigger::Reload));

        assert_eq!(rx.recv().await, Some(Trigger::Startup));
        assert!(queue.trigger(Trigger::Reload));
        assert_eq!(rx.recv().await, Some(Trigger::Reload));
    }

    #[tokio::test]
    async fn test_trigger_after_worker_gone() {
        let (queue, rx) = TriggerQueue::channel();
        drop(rx);
        assert!(!queue.trigger(Trigger::Reload));
    }

    #[tokio::test]
    async fn test_worker_drains_queue_serially() {
        let (queue, rx) = TriggerQueue::channel();
        assert!(queue.trigger(Trigger::Startup));

        let mut requeue = Some(queue);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let (seen_in, running_in, max_in) = (seen.clone(), running.clone(), max_running.clone());
        run_worker(
            rx,
            move |trigger| {
                // the last sender is dropped here, so the worker exits once drained
                if let Some(queue) = requeue.take() {
                    assert!(queue.trigger(Trigger::Reload));
                    assert!(!queue.trigger(Trigger::Interval));
                }
                let (seen, running, max_running) =
                    (seen_in.clone(), running_in.clone(), max_in.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    seen.lock().unwrap().push(trigger);
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            },
            std::future::pending::<()>(),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![Trigger::Startup, Trigger::Reload]);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_each_period() {
        let (queue, mut rx) = TriggerQueue::channel();
        let handle = spawn_ticker(queue, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(rx.rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(Trigger::Interval));
        assert_eq!(rx.recv().await, Some(Trigger::Interval));

        handle.abort();
    }

    #[tokio::test]
    async fn test_ticker_with_unrepresentable_period_exits() {
        let (queue, _rx) = TriggerQueue::channel();
        let handle = spawn_ticker(queue, Duration::MAX);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_every_sighup_queues_reload() {
        let (queue, mut rx) = TriggerQueue::channel();
        let handle = spawn_reload_listener(queue).unwrap();

        for _ in 0..2 {
            // SAFETY: the listener above has installed a SIGHUP handler
            let rc = unsafe { libc::raise(libc::SIGHUP) };
            assert_eq!(rc, 0);

            let trigger = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(trigger, Some(Trigger::Reload));
        }

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_on_shutdown() {
        let (queue, rx) = TriggerQueue::channel();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        run_worker(
            rx,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            },
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!queue.trigger(Trigger::Reload));
    }
}
