//! Owned background tasks with their own stop signal
//!
//! The stop channel is created before the task is spawned and lives on the
//! handle, so there is never a task waiting on a signal nobody can send.
//! Stopping twice is a no-op. Dropping the handle drops the sender, which the
//! task also treats as a stop.

use super::ConfigError;
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub(crate) struct BackgroundTask {
    name: &'static str,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Spawn `run` on the current tokio runtime, handing it the receiving end
    /// of the stop channel
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime(name))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = runtime.spawn(run(stop_rx));
        tracing::debug!(task = name, "background task started");

        Ok(BackgroundTask {
            name,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Signal the task to stop. Returns `false` if it was already signalled.
    pub(crate) fn stop(&self) -> bool {
        match self.stop_tx.lock().take() {
            Some(tx) => {
                // The task may already be gone; that is as good as stopped
                let _ = tx.send(());
                tracing::debug!(task = self.name, "background task stop requested");
                true
            }
            None => false,
        }
    }

    /// Stop the task and wait for it to finish
    pub(crate) async fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, "background task ended abnormally: {}", e);
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> Result<BackgroundTask, ConfigError> {
        BackgroundTask::spawn("sleeper", |mut stop| async move {
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            }
        })
    }

    #[test]
    fn test_spawn_requires_runtime() {
        assert!(matches!(sleeper(), Err(ConfigError::NoRuntime("sleeper"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let task = sleeper().unwrap();
        assert_eq!(task.name(), "sleeper");
        assert!(!task.is_finished());

        assert!(task.stop());
        assert!(!task.stop());

        task.join().await;
        assert!(task.is_finished());

        // Joining again is harmless
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let task = sleeper().unwrap();
        let handle = task.handle.lock().take().unwrap();
        drop(task);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should end once its handle is dropped")
            .unwrap();
    }
}
