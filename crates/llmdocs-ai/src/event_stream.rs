use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::completion::{CompletionEvent, StreamStatus};
use crate::error::LlmError;

/// How a running completion settles.
pub(crate) enum Settle {
    Done,
    Errored(LlmError),
    Aborted,
}

struct LogState {
    status: StreamStatus,
    text: String,
    /// Deltas not yet handed to [`CompletionLog::next`], as byte ranges of `text`.
    undelivered: VecDeque<Range<usize>>,
    error: Option<LlmError>,
    terminal_delivered: bool,
}

impl LogState {
    fn terminal_event(&self) -> Option<CompletionEvent> {
        match self.status {
            StreamStatus::Done => Some(CompletionEvent::Done {
                text: self.text.clone(),
            }),
            StreamStatus::Aborted => Some(CompletionEvent::Aborted {
                text: self.text.clone(),
            }),
            StreamStatus::Errored => self.error.clone().map(CompletionEvent::Error),
            StreamStatus::Pending | StreamStatus::Running => None,
        }
    }

    fn outcome(&self) -> Option<Result<String, LlmError>> {
        match self.status {
            StreamStatus::Done | StreamStatus::Aborted => Some(Ok(self.text.clone())),
            StreamStatus::Errored => self.error.clone().map(Err),
            StreamStatus::Pending | StreamStatus::Running => None,
        }
    }
}

/// Status, accumulated text and pending events of one completion.
///
/// The reply text is stored once; undelivered deltas only keep their offsets,
/// so callers that never read events pay nothing per delta beyond a range.
pub(crate) struct CompletionLog {
    state: Mutex<LogState>,
    changed: Notify,
}

impl CompletionLog {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                status: StreamStatus::Pending,
                text: String::new(),
                undelivered: VecDeque::new(),
                error: None,
                terminal_delivered: false,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.lock().status
    }

    pub(crate) fn text(&self) -> String {
        self.lock().text.clone()
    }

    /// Moves `Pending` to `Running`. Returns `false` if the stream already
    /// left `Pending`.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.lock();
        if state.status != StreamStatus::Pending {
            return false;
        }
        state.status = StreamStatus::Running;
        true
    }

    /// Ignored unless running.
    pub(crate) fn append(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        {
            let mut state = self.lock();
            if state.status != StreamStatus::Running {
                return;
            }
            let start = state.text.len();
            state.text.push_str(delta);
            let end = state.text.len();
            state.undelivered.push_back(start..end);
        }
        self.changed.notify_waiters();
    }

    /// Records the terminal state. `Done` and `Errored` apply only to a
    /// running stream; `Aborted` applies to any stream not yet settled.
    /// Returns the accumulated text length when the transition happened.
    pub(crate) fn settle(&self, settle: Settle) -> Option<usize> {
        let len = {
            let mut state = self.lock();
            let allowed = match settle {
                Settle::Done | Settle::Errored(_) => state.status == StreamStatus::Running,
                Settle::Aborted => !state.status.is_terminal(),
            };
            if !allowed {
                return None;
            }
            state.status = match settle {
                Settle::Done => StreamStatus::Done,
                Settle::Errored(error) => {
                    state.error = Some(error);
                    StreamStatus::Errored
                }
                Settle::Aborted => StreamStatus::Aborted,
            };
            state.text.len()
        };
        self.changed.notify_waiters();
        Some(len)
    }

    /// Next delta in arrival order, then the terminal event once, then `None`.
    pub(crate) async fn next(&self) -> Option<CompletionEvent> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(range) = state.undelivered.pop_front() {
                    let delta = state.text.get(range).unwrap_or_default().to_string();
                    return Some(CompletionEvent::Delta(delta));
                }
                if state.terminal_delivered {
                    return None;
                }
                if let Some(event) = state.terminal_event() {
                    state.terminal_delivered = true;
                    return Some(event);
                }
            }
            notified.await;
        }
    }

    /// Waits for the terminal state. Independent of [`CompletionLog::next`].
    pub(crate) async fn outcome(&self) -> Result<String, LlmError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.lock().outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn undelivered_len(&self) -> usize {
        self.lock().undelivered.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::LlmErrorCode;

    #[tokio::test]
    async fn deltas_then_single_terminal_event() {
        let log = CompletionLog::new();
        assert!(log.begin());
        assert!(!log.begin());
        log.append("Hel");
        log.append("");
        log.append("lo");
        assert_eq!(log.settle(Settle::Done), Some(5));

        assert_eq!(log.next().await, Some(CompletionEvent::Delta("Hel".into())));
        assert_eq!(log.next().await, Some(CompletionEvent::Delta("lo".into())));
        assert_eq!(
            log.next().await,
            Some(CompletionEvent::Done {
                text: "Hello".into()
            })
        );
        assert_eq!(log.next().await, None);
        assert_eq!(log.outcome().await, Ok("Hello".to_string()));
    }

    #[tokio::test]
    async fn multibyte_deltas_keep_their_boundaries() {
        let log = CompletionLog::new();
        log.begin();
        log.append("héllo ");
        log.append("wörld");
        log.settle(Settle::Done);
        assert_eq!(log.next().await, Some(CompletionEvent::Delta("héllo ".into())));
        assert_eq!(log.next().await, Some(CompletionEvent::Delta("wörld".into())));
    }

    #[tokio::test]
    async fn nothing_is_appended_outside_running() {
        let log = CompletionLog::new();
        log.append("early");
        assert_eq!(log.text(), "");
        log.begin();
        log.append("kept");
        assert_eq!(log.settle(Settle::Aborted), Some(4));
        log.append("late");
        assert_eq!(log.settle(Settle::Done), None);
        assert_eq!(log.settle(Settle::Aborted), None);
        assert_eq!(log.status(), StreamStatus::Aborted);
        assert_eq!(log.outcome().await, Ok("kept".to_string()));
    }

    #[tokio::test]
    async fn delivered_deltas_are_released() {
        let log = CompletionLog::new();
        log.begin();
        for _ in 0..3 {
            log.append("x");
        }
        assert_eq!(log.undelivered_len(), 3);
        log.next().await;
        log.next().await;
        assert_eq!(log.undelivered_len(), 1);
    }

    #[tokio::test]
    async fn errored_stream_reports_error_to_both_consumers() {
        let log = CompletionLog::new();
        log.begin();
        log.append("partial");
        let error = LlmError::new(LlmErrorCode::Http, "502 Bad Gateway");
        assert!(log.settle(Settle::Errored(error.clone())).is_some());
        assert_eq!(log.outcome().await, Err(error.clone()));
        assert_eq!(log.next().await, Some(CompletionEvent::Delta("partial".into())));
        assert_eq!(log.next().await, Some(CompletionEvent::Error(error)));
        assert_eq!(log.next().await, None);
    }

    #[tokio::test]
    async fn outcome_waits_for_settle_from_another_task() {
        let log = Arc::new(CompletionLog::new());
        log.begin();
        let waiter = tokio::spawn({
            let log = Arc::clone(&log);
            async move { log.outcome().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        log.append("late text");
        log.settle(Settle::Done);
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter joined");
        assert_eq!(outcome, Ok("late text".to_string()));
    }
}
