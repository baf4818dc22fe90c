use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Word-by-word reveal of a reply.
///
/// Each reveal takes a fresh owner token; starting another reveal or calling
/// [`Typewriter::invalidate`] makes older reveals stop at their next tick.
#[derive(Debug, Clone)]
pub struct Typewriter {
    owner: Arc<AtomicU64>,
    interval: Duration,
}

impl Typewriter {
    pub fn new(interval: Duration) -> Self {
        Self {
            owner: Arc::new(AtomicU64::new(0)),
            interval,
        }
    }

    /// Rotate the owner token, returning the new one
    pub fn invalidate(&self) -> u64 {
        self.owner.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reveal `text` one word per tick, calling `update` with the text so far
    pub fn reveal<F>(&self, text: &str, cancel: CancellationToken, mut update: F) -> JoinHandle<()>
    where
        F: FnMut(String) + Send + 'static,
    {
        let token = self.invalidate();
        let owner = Arc::clone(&self.owner);
        let interval = self.interval;
        let words: Vec<String> = text.split(' ').map(str::to_string).collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            let mut shown = 0;

            while shown < words.len() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if owner.load(Ordering::SeqCst) != token {
                    return;
                }

                shown += 1;
                update(words[..shown].join(" "));
            }
        })
    }
}
