use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::store::Store;

/// The store's background writer: periodically auto-commits unsaved
/// changes and, once fill rate drops below the configured target,
/// auto-compacts. One thread per open store; stopped by closing
/// `stop_tx`, which races the sleep so shutdown is prompt.
pub struct BackgroundWriter {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl BackgroundWriter {
    pub fn spawn(store: Arc<Store>) -> Option<Self> {
        if store.config.auto_commit_delay_ms == 0 {
            return None;
        }
        let (stop_tx, stop_rx) = bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let delay = Duration::from_millis(store.config.auto_commit_delay_ms);

        let handle = std::thread::Builder::new()
            .name("kenchidb-background-writer".into())
            .spawn(move || Self::run(store, stop_rx, delay, running_clone))
            .ok()?;

        Some(BackgroundWriter {
            stop_tx,
            handle: Some(handle),
            running,
        })
    }

    fn run(store: Arc<Store>, stop_rx: Receiver<()>, delay: Duration, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            match stop_rx.recv_timeout(delay) {
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
            if store.has_unsaved_changes() {
                if let Err(e) = store.try_commit() {
                    Self::report(&store, &e);
                    continue;
                }
                debug!("background auto-commit completed");
            }
            if store.config.auto_compact_fill_rate > 0 && store.chunks_fill_rate() < store.config.auto_compact_fill_rate {
                if let Err(e) = store.compact_file(u64::MAX) {
                    Self::report(&store, &e);
                }
            }
        }
    }

    fn report(store: &Arc<Store>, error: &crate::error::StorageError) {
        warn!(%error, "background writer error");
        if let Some(handler) = &store.config.background_exception_handler {
            handler(error);
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        self.stop();
    }
}
