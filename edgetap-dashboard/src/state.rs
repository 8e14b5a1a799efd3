//! Dashboard state as an explicit single-writer machine.
//!
//! `(buffer, cursor, loading)` × [`Event`] → new state. Fetches happen
//! outside; only their results are fed in through [`DashboardState::apply`].

use crate::buffer::ClientLogBuffer;
use crate::metrics::DerivedMetrics;
use crate::view::RowDetail;
use edgetap_core::{Cursor, Page, StorageRow};

/// Result of a fetch, with the error already rendered for display.
pub type FetchResult = Result<Page, String>;

#[derive(Debug)]
pub enum Event {
    /// First page for the load started under `generation`.
    InitialLoaded { generation: u64, result: FetchResult },
    /// Newest page from an interval poll.
    PollResult(FetchResult),
    /// Older page from the "load more" started under `generation`.
    PageResult { generation: u64, result: FetchResult },
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; `added` rows entered the buffer.
    Applied { added: usize },
    /// Fetch failed; previous data stays on screen.
    Failed,
    /// Result belonged to a superseded load or arrived after teardown.
    Discarded,
}

#[derive(Debug)]
pub struct DashboardState {
    buffer: ClientLogBuffer,
    cursor: Option<Cursor>,
    loading: bool,
    page_size: usize,
    window_limit: usize,
    generation: u64,
    torn_down: bool,
    last_error: Option<String>,
}

impl DashboardState {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            buffer: ClientLogBuffer::new(),
            cursor: None,
            loading: false,
            page_size,
            window_limit: page_size,
            generation: 0,
            torn_down: false,
            last_error: None,
        }
    }

    /// Start a fresh initial load and return its generation. Any load still
    /// in flight is superseded.
    pub fn begin_initial_load(&mut self) -> u64 {
        self.generation += 1;
        self.loading = true;
        self.generation
    }

    /// Claim the stored cursor for a "load more" fetch, tagged with the
    /// current generation.
    ///
    /// `None` while another load is running, when there is nothing older,
    /// or after teardown.
    pub fn begin_load_more(&mut self) -> Option<(u64, Cursor)> {
        if self.loading || self.torn_down {
            return None;
        }
        let cursor = self.cursor.clone()?;
        self.loading = true;
        Some((self.generation, cursor))
    }

    pub fn apply(&mut self, event: Event) -> Transition {
        if self.torn_down {
            return Transition::Discarded;
        }
        match event {
            Event::InitialLoaded { generation, result } => {
                if generation != self.generation {
                    return Transition::Discarded;
                }
                self.loading = false;
                match result {
                    Ok(page) => {
                        self.buffer.replace(page.data);
                        self.cursor = page.next_cursor;
                        self.window_limit = self.page_size;
                        self.last_error = None;
                        Transition::Applied {
                            added: self.buffer.len(),
                        }
                    }
                    Err(e) => self.fail(e),
                }
            }
            Event::PollResult(result) => match result {
                Ok(page) => {
                    // A poll landing on an empty buffer doubles as the first load.
                    if self.buffer.is_empty() && self.cursor.is_none() {
                        self.cursor = page.next_cursor;
                    }
                    let added = self.buffer.merge_newest(page.data);
                    self.last_error = None;
                    Transition::Applied { added }
                }
                Err(e) => self.fail(e),
            },
            Event::PageResult { generation, result } => {
                // A reload started since; its own result owns `loading`.
                if generation != self.generation {
                    return Transition::Discarded;
                }
                self.loading = false;
                match result {
                    Ok(page) => {
                        let added = self.buffer.append_older(page.data);
                        self.cursor = page.next_cursor;
                        self.window_limit += self.page_size;
                        self.last_error = None;
                        Transition::Applied { added }
                    }
                    Err(e) => self.fail(e),
                }
            }
            Event::Teardown => {
                self.torn_down = true;
                self.loading = false;
                self.generation += 1;
                Transition::Applied { added: 0 }
            }
        }
    }

    fn fail(&mut self, error: String) -> Transition {
        self.last_error = Some(error);
        Transition::Failed
    }

    /// Rows metrics and the table are computed over: the newest
    /// `window_limit` rows of the buffer.
    pub fn window(&self) -> &[StorageRow] {
        self.buffer.window(self.window_limit)
    }

    pub fn metrics(&self) -> DerivedMetrics {
        DerivedMetrics::compute(self.window())
    }

    /// Detail view for a buffered row, whether or not it is in the window.
    pub fn detail(&self, request_id: &str) -> Option<RowDetail> {
        self.buffer.get(request_id).map(RowDetail::from_row)
    }

    pub fn buffer(&self) -> &ClientLogBuffer {
        &self.buffer
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn window_limit(&self) -> usize {
        self.window_limit
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
