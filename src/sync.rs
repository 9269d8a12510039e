//! Brings the read markers of one manga in line with its chapter list.
//!
//! Every attempt starts from a fresh read of the markers: the service may answer a
//! mark request with success and still drop it, so only the next fetch is trusted.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::Error;
use crate::mangadex::{ChapterId, Gateway, SessionToken};

/// Spacing of mark requests: a pause of `window` after every `max_per_window` requests,
/// including the last one of a run, so the next run starts in a fresh window.
/// A `max_per_window` of zero disables pausing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub max_per_window: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of fetch-diff-dispatch cycles. At least one cycle always runs.
    pub max_attempts: u32,
    /// Wait before dispatching on every attempt after the first.
    pub retry_delay: Duration,
    /// Wait before the first dispatch.
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Marked(ChapterId),
    Failed { chapter: ChapterId, error: String },
}

impl DispatchResult {
    pub fn is_marked(&self) -> bool {
        matches!(self, DispatchResult::Marked(_))
    }
}

#[derive(Debug, Default)]
pub struct Dispatch {
    pub results: Vec<DispatchResult>,
    pub pauses: usize,
}

/// Chapters of `chapters` that have no read marker, in list order.
/// Duplicate ids are kept and checked one by one.
pub fn compute_pending(chapters: &[ChapterId], read: &HashSet<ChapterId>) -> Vec<ChapterId> {
    chapters
        .iter()
        .filter(|chapter| !read.contains(*chapter))
        .cloned()
        .collect()
}

/// Marks every chapter of `pending` as read, one request at a time.
///
/// A failed request is recorded and the loop moves on to the next chapter.
pub async fn dispatch_marks<G>(
    gateway: &G,
    pending: &[ChapterId],
    token: &SessionToken,
    pacing: Pacing,
) -> Dispatch
where
    G: Gateway + Sync,
{
    let mut dispatch = Dispatch {
        results: Vec::with_capacity(pending.len()),
        pauses: 0,
    };

    for (index, chapter) in pending.iter().enumerate() {
        let result = match gateway.mark_read(token, chapter).await {
            Ok(()) => {
                log::debug!("marked chapter {} as read", chapter);
                DispatchResult::Marked(chapter.clone())
            }
            Err(e) => {
                log::warn!("failed to mark chapter {} as read: {}", chapter, e);
                DispatchResult::Failed {
                    chapter: chapter.clone(),
                    error: e.to_string(),
                }
            }
        };
        dispatch.results.push(result);

        let sent = index + 1;
        if pacing.max_per_window > 0 && sent % pacing.max_per_window == 0 {
            log::debug!("sent {} requests, waiting {:?}", sent, pacing.window);
            sleep(pacing.window).await;
            dispatch.pauses += 1;
        }
    }

    dispatch
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Fetching,
    Dispatching(Vec<ChapterId>),
    Converged,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    AllMarked,
    PartiallyMarked,
}

/// One dispatched fetch-diff-dispatch cycle.
#[derive(Debug)]
pub struct Attempt {
    pub index: u32,
    pub pending: Vec<ChapterId>,
    pub dispatch: Dispatch,
}

impl Attempt {
    pub fn outcome(&self) -> AttemptOutcome {
        if self.dispatch.results.iter().all(DispatchResult::is_marked) {
            AttemptOutcome::AllMarked
        } else {
            AttemptOutcome::PartiallyMarked
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    /// Attempts ran out; `unconfirmed` chapters were pending in the last attempt.
    Exhausted { unconfirmed: usize },
}

#[derive(Debug)]
pub struct Summary {
    pub chapters: usize,
    pub attempts: Vec<Attempt>,
    pub outcome: Outcome,
}

impl Summary {
    pub fn marked(&self) -> usize {
        self.results().filter(|r| r.is_marked()).count()
    }

    /// Failed mark requests over all attempts; a chapter counts once per attempt.
    pub fn failed_requests(&self) -> usize {
        self.results().filter(|r| !r.is_marked()).count()
    }

    /// Distinct chapters with at least one failed mark request.
    pub fn failed_chapters(&self) -> usize {
        self.results()
            .filter_map(|r| match r {
                DispatchResult::Failed { chapter, .. } => Some(chapter),
                DispatchResult::Marked(_) => None,
            })
            .collect::<HashSet<_>>()
            .len()
    }

    /// Chapters whose mark request failed in the last attempt.
    pub fn failures(&self) -> impl Iterator<Item = (&ChapterId, &str)> {
        self.attempts
            .last()
            .into_iter()
            .flat_map(|a| a.dispatch.results.iter())
            .filter_map(|r| match r {
                DispatchResult::Failed { chapter, error } => Some((chapter, error.as_str())),
                DispatchResult::Marked(_) => None,
            })
    }

    fn results(&self) -> impl Iterator<Item = &DispatchResult> {
        self.attempts.iter().flat_map(|a| a.dispatch.results.iter())
    }
}

pub struct Reconciler<'a, G> {
    gateway: &'a G,
    token: &'a SessionToken,
    pacing: Pacing,
    policy: RetryPolicy,
}

impl<'a, G> Reconciler<'a, G>
where
    G: Gateway + Sync,
{
    pub fn new(gateway: &'a G, token: &'a SessionToken, pacing: Pacing, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            token,
            pacing,
            policy,
        }
    }

    /// Runs fetch-diff-dispatch cycles until no chapter is pending or the attempts run out.
    ///
    /// Fails only when the read markers cannot be fetched.
    pub async fn reconcile(
        &self,
        manga_id: &str,
        language: &str,
        chapters: &[ChapterId],
    ) -> Result<Summary, Error> {
        let mut attempt: u32 = 0;
        let mut attempts = Vec::new();
        let mut state = State::Fetching;

        loop {
            state = match state {
                State::Fetching => {
                    let read = self.gateway.read_markers(self.token, manga_id).await?;
                    let pending = compute_pending(chapters, &read);
                    log::info!(
                        "attempt {}: {} of {} [{}] chapters unread ({} read markers)",
                        attempt,
                        pending.len(),
                        chapters.len(),
                        language,
                        read.len()
                    );

                    if pending.is_empty() {
                        State::Converged
                    } else {
                        State::Dispatching(pending)
                    }
                }
                State::Dispatching(pending) => {
                    let wait = if attempt == 0 {
                        self.policy.settle
                    } else {
                        self.policy.retry_delay
                    };
                    if !wait.is_zero() {
                        log::info!("waiting {:?} before marking", wait);
                        sleep(wait).await;
                    }

                    let dispatch = dispatch_marks(self.gateway, &pending, self.token, self.pacing).await;
                    let done = Attempt {
                        index: attempt,
                        pending,
                        dispatch,
                    };
                    match done.outcome() {
                        AttemptOutcome::AllMarked => log::info!(
                            "attempt {}: sent {} marks ({} pauses)",
                            done.index,
                            done.pending.len(),
                            done.dispatch.pauses
                        ),
                        AttemptOutcome::PartiallyMarked => log::warn!(
                            "attempt {}: {} of {} marks failed ({} pauses)",
                            done.index,
                            done.dispatch.results.iter().filter(|r| !r.is_marked()).count(),
                            done.pending.len(),
                            done.dispatch.pauses
                        ),
                    }
                    attempts.push(done);

                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        State::Exhausted
                    } else {
                        State::Fetching
                    }
                }
                State::Converged => {
                    return Ok(Summary {
                        chapters: chapters.len(),
                        attempts,
                        outcome: Outcome::Converged,
                    });
                }
                State::Exhausted => {
                    let unconfirmed = attempts.last().map_or(0, |a| a.pending.len());
                    return Ok(Summary {
                        chapters: chapters.len(),
                        attempts,
                        outcome: Outcome::Exhausted { unconfirmed },
                    });
                }
            };
        }
    }
}
