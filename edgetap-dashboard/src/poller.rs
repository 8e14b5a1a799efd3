use crate::client::LogsClient;
use crate::state::{DashboardState, Event, FetchResult, Transition};
use crate::view::RowDetail;
use edgetap_core::config::DashboardConfig;
use edgetap_core::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drives [`DashboardState`] from a [`LogsClient`].
///
/// Fetches run without holding the state lock; each result is applied in a
/// single locked step, so the interval poll and "load more" can interleave
/// safely.
pub struct Dashboard {
    client: Arc<dyn LogsClient>,
    state: Mutex<DashboardState>,
    page_size: usize,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl Dashboard {
    pub fn new(client: Arc<dyn LogsClient>, config: &DashboardConfig) -> Self {
        Self {
            client,
            state: Mutex::new(DashboardState::new(config.page_size)),
            page_size: config.page_size.max(1),
            poll_interval: config.poll_interval().max(Duration::from_millis(1)),
            poll_timeout: config.poll_timeout().max(Duration::from_millis(1)),
        }
    }

    pub async fn state(&self) -> MutexGuard<'_, DashboardState> {
        self.state.lock().await
    }

    async fn fetch(&self, cursor: Option<&Cursor>) -> FetchResult {
        match tokio::time::timeout(self.poll_timeout, self.client.fetch_page(self.page_size, cursor))
            .await
        {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "query timed out after {}ms",
                self.poll_timeout.as_millis()
            )),
        }
    }

    pub async fn initial_load(&self) -> Transition {
        let generation = self.state.lock().await.begin_initial_load();
        let result = self.fetch(None).await;
        let transition = self
            .state
            .lock()
            .await
            .apply(Event::InitialLoaded { generation, result });
        log_transition("initial load", transition);
        transition
    }

    /// One poll of the newest page. Timed-out or failed polls are skipped;
    /// the next tick tries again.
    pub async fn poll_once(&self) -> Transition {
        let result = self.fetch(None).await;
        let transition = self.state.lock().await.apply(Event::PollResult(result));
        log_transition("poll", transition);
        transition
    }

    /// Fetch the page after the stored cursor. `None` when there is nothing
    /// older or another load is already running.
    pub async fn load_more(&self) -> Option<Transition> {
        let (generation, cursor) = self.state.lock().await.begin_load_more()?;
        let result = self.fetch(Some(&cursor)).await;
        let transition = self
            .state
            .lock()
            .await
            .apply(Event::PageResult { generation, result });
        log_transition("load more", transition);
        Some(transition)
    }

    /// Load up to `pages` older pages, stopping early when nothing older
    /// remains or a fetch fails. Returns how many pages were applied.
    pub async fn load_pages(&self, pages: usize) -> usize {
        let mut applied = 0;
        while applied < pages {
            match self.load_more().await {
                Some(Transition::Applied { .. }) => applied += 1,
                _ => break,
            }
        }
        applied
    }

    /// Detail for `request_id`, paging back through at most `max_pages`
    /// older pages until it is buffered.
    pub async fn find_row(&self, request_id: &str, max_pages: usize) -> Option<RowDetail> {
        let mut loaded = 0;
        loop {
            if let Some(detail) = self.state.lock().await.detail(request_id) {
                return Some(detail);
            }
            if loaded == max_pages {
                return None;
            }
            match self.load_more().await {
                Some(Transition::Applied { .. }) => loaded += 1,
                _ => return None,
            }
        }
    }

    pub async fn teardown(&self) {
        self.state.lock().await.apply(Event::Teardown);
    }

    /// Initial load plus `history_pages` older pages, then poll every
    /// `poll_interval` until `shutdown` flips.
    ///
    /// `on_refresh` runs with the lock held after every result that was not
    /// discarded, failures included so the view can show the error.
    pub async fn run<F>(
        &self,
        history_pages: usize,
        mut shutdown: watch::Receiver<bool>,
        mut on_refresh: F,
    ) where
        F: FnMut(&DashboardState) + Send,
    {
        if self.initial_load().await != Transition::Discarded {
            if history_pages > 0 {
                let loaded = self.load_pages(history_pages).await;
                debug!(requested = history_pages, loaded, "history pages loaded");
            }
            on_refresh(&*self.state.lock().await);
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately; the initial load already covered it.
        ticker.tick().await;

        info!(interval_ms = self.poll_interval.as_millis() as u64, "dashboard polling");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if self.poll_once().await != Transition::Discarded {
                        on_refresh(&*self.state.lock().await);
                    }
                }
            }
        }
        self.teardown().await;
        info!("dashboard stopped");
    }
}

fn log_transition(action: &str, transition: Transition) {
    match transition {
        Transition::Applied { added } => debug!(action, added, "dashboard updated"),
        Transition::Failed => warn!(action, "fetch failed, keeping previous data"),
        Transition::Discarded => debug!(action, "stale result discarded"),
    }
}
