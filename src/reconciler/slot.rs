//! A cached page plus the bookkeeping that keeps stale responses out.

use serde::Serialize;

use crate::error::ApiError;
use crate::models::Page;
use crate::service::{ApiResult, PageRequest};

// ---

/// Handle for one issued load. Only the most recently issued ticket of a
/// slot may write to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

/// Result of a page load as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    /// The page was replaced with the server's snapshot.
    Fresh(Page<T>),
    /// The load failed; the previously cached page is still shown.
    Stale { cached: Page<T>, error: ApiError },
    /// The load failed and nothing was ever loaded.
    Failed(ApiError),
    /// A newer load was issued before this one resolved; its result was dropped.
    Superseded,
}

impl<T> LoadOutcome<T> {
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            LoadOutcome::Stale { error, .. } | LoadOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Nothing requested yet.
    Empty,
    Fresh,
    /// Showing cached data after a failed refresh.
    Stale,
    /// Never loaded successfully.
    Failed,
}

/// What a view renders for one listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView<T> {
    pub status: PageStatus,
    pub page: Option<Page<T>>,
    pub error: Option<String>,
    /// `true` when the failure is a lost connection, so the view can show
    /// an offline banner with a retry action.
    pub offline: bool,
}

#[derive(Debug)]
pub(crate) struct PageSlot<T, F> {
    // ---
    issued: u64,
    /// Parameters of the most recently issued request.
    latest: Option<PageRequest<F>>,
    /// Parameters that produced `page`.
    applied: Option<PageRequest<F>>,
    page: Option<Page<T>>,
    error: Option<ApiError>,
}

impl<T, F> Default for PageSlot<T, F> {
    fn default() -> Self {
        Self {
            issued: 0,
            latest: None,
            applied: None,
            page: None,
            error: None,
        }
    }
}

impl<T: Clone, F: Clone> PageSlot<T, F> {
    // ---
    pub(crate) fn begin(&mut self, request: PageRequest<F>) -> Ticket {
        self.issued += 1;
        self.latest = Some(request);
        Ticket(self.issued)
    }

    /// Apply a response if `ticket` is still the latest issued.
    pub(crate) fn complete(&mut self, ticket: Ticket, result: ApiResult<Page<T>>) -> LoadOutcome<T> {
        // ---
        if ticket.0 != self.issued {
            return LoadOutcome::Superseded;
        }
        match result {
            Ok(page) => {
                self.page = Some(page.clone());
                self.applied = self.latest.clone();
                self.error = None;
                LoadOutcome::Fresh(page)
            }
            Err(error) => {
                self.error = Some(error.clone());
                match &self.page {
                    Some(cached) => LoadOutcome::Stale {
                        cached: cached.clone(),
                        error,
                    },
                    None => LoadOutcome::Failed(error),
                }
            }
        }
    }

    pub(crate) fn latest_request(&self) -> Option<&PageRequest<F>> {
        self.latest.as_ref()
    }

    pub(crate) fn applied_request(&self) -> Option<&PageRequest<F>> {
        self.applied.as_ref()
    }

    pub(crate) fn page(&self) -> Option<&Page<T>> {
        self.page.as_ref()
    }

    pub(crate) fn page_mut(&mut self) -> Option<&mut Page<T>> {
        self.page.as_mut()
    }

    pub(crate) fn view(&self) -> PageView<T> {
        // ---
        let status = match (&self.page, &self.error) {
            (Some(_), None) => PageStatus::Fresh,
            (Some(_), Some(_)) => PageStatus::Stale,
            (None, Some(_)) => PageStatus::Failed,
            (None, None) => PageStatus::Empty,
        };
        PageView {
            status,
            page: self.page.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            offline: self.error.as_ref().is_some_and(ApiError::is_connectivity),
        }
    }

    /// Forget everything. In-flight loads become stale.
    pub(crate) fn reset(&mut self) {
        self.issued += 1;
        self.latest = None;
        self.applied = None;
        self.page = None;
        self.error = None;
    }
}
