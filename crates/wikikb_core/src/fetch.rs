//! Per-term retrieval policy.
//!
//! A term is looked up in the caller's language first. A missing page in the
//! home language is retried once in the fallback language; if that lookup is
//! ambiguous, one exact-title lookup is made before giving up. Transient
//! errors in the caller's language are retried with a linear backoff.
//!
//! The caller's language is an argument, never client state, so every exit
//! path leaves it untouched.

use std::thread::sleep;
use std::time::Duration;

use crate::client::{EncyclopediaApi, LookupError, Page, TitleLookup};
use crate::config::KbConfig;

pub trait Pause {
    fn pause(&mut self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { content: String, language: String },
    /// The title is ambiguous.
    Skipped,
    NotFound,
    /// Transient errors outlasted the retry budget.
    TransientFailure,
}

impl FetchOutcome {
    pub fn into_content(self) -> Option<String> {
        match self {
            Self::Success { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A state that issues one page lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Primary { attempt: usize },
    Fallback,
    FallbackExact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Probe(Probe),
    Backoff { attempt: usize, delay: Duration },
    Done(FetchOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub home_language: String,
    pub fallback_language: String,
    /// Total attempts in the caller's language.
    pub retries: usize,
    pub backoff_step: Duration,
}

impl FetchPolicy {
    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            home_language: config.home_language(),
            fallback_language: config.fallback_language(),
            retries: config.fetch_retries(),
            backoff_step: config.backoff_step(),
        }
    }

    /// Wait before retrying after the given 1-based attempt failed.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.backoff_step.saturating_mul(factor)
    }

    pub fn fetch_content(
        &self,
        api: &mut dyn EncyclopediaApi,
        pause: &mut dyn Pause,
        term: &str,
        active_language: &str,
    ) -> FetchOutcome {
        let mut state = FetchState::Probe(Probe::Primary { attempt: 1 });
        loop {
            state = match state {
                FetchState::Done(outcome) => return outcome,
                FetchState::Backoff { attempt, delay } => {
                    pause.pause(delay);
                    FetchState::Probe(Probe::Primary {
                        attempt: attempt + 1,
                    })
                }
                FetchState::Probe(probe) => {
                    let (language, lookup) = self.request_for(probe, active_language);
                    tracing::debug!(term, language, ?probe, "looking up page");
                    let result = api.fetch_page(language, term, lookup);
                    self.transition(probe, result, active_language, term)
                }
            };
        }
    }

    pub fn request_for<'a>(
        &'a self,
        probe: Probe,
        active_language: &'a str,
    ) -> (&'a str, TitleLookup) {
        match probe {
            Probe::Primary { .. } => (active_language, TitleLookup::AutoSuggest),
            Probe::Fallback => (self.fallback_language.as_str(), TitleLookup::AutoSuggest),
            Probe::FallbackExact => (self.fallback_language.as_str(), TitleLookup::Exact),
        }
    }

    pub fn transition(
        &self,
        probe: Probe,
        result: Result<Page, LookupError>,
        active_language: &str,
        term: &str,
    ) -> FetchState {
        match (probe, result) {
            (_, Ok(page)) => {
                if page.language != active_language {
                    tracing::info!(term, language = %page.language, "found page in fallback language");
                }
                FetchState::Done(FetchOutcome::Success {
                    content: page.to_markdown(),
                    language: page.language,
                })
            }

            (Probe::Primary { .. }, Err(LookupError::Disambiguation { .. })) => {
                tracing::info!(term, "ambiguous page skipped");
                FetchState::Done(FetchOutcome::Skipped)
            }
            (Probe::Primary { .. }, Err(LookupError::NotFound { .. }))
                if active_language == self.home_language
                    && self.fallback_language != self.home_language =>
            {
                tracing::info!(
                    term,
                    home = %self.home_language,
                    fallback = %self.fallback_language,
                    "no page in home language, trying fallback"
                );
                FetchState::Probe(Probe::Fallback)
            }
            (Probe::Primary { .. }, Err(LookupError::NotFound { .. })) => {
                tracing::info!(term, language = active_language, "page does not exist");
                FetchState::Done(FetchOutcome::NotFound)
            }
            (Probe::Primary { attempt }, Err(LookupError::Other(error)))
                if attempt < self.retries =>
            {
                let delay = self.backoff_for(attempt);
                tracing::warn!(
                    term,
                    attempt,
                    retries = self.retries,
                    wait_secs = delay.as_secs_f64(),
                    "fetch failed, retrying: {error:#}"
                );
                FetchState::Backoff { attempt, delay }
            }
            (Probe::Primary { .. }, Err(LookupError::Other(error))) => {
                tracing::warn!(term, "fetch failed, giving up: {error:#}");
                FetchState::Done(FetchOutcome::TransientFailure)
            }

            (Probe::Fallback, Err(LookupError::NotFound { .. })) => {
                tracing::info!(term, language = %self.fallback_language, "fallback page does not exist either");
                FetchState::Done(FetchOutcome::NotFound)
            }
            (Probe::Fallback, Err(LookupError::Disambiguation { .. })) => {
                tracing::debug!(term, "fallback lookup ambiguous, trying exact title");
                FetchState::Probe(Probe::FallbackExact)
            }
            (Probe::Fallback, Err(LookupError::Other(error))) => {
                tracing::warn!(term, language = %self.fallback_language, "fallback lookup failed: {error:#}");
                FetchState::Done(FetchOutcome::TransientFailure)
            }

            (Probe::FallbackExact, Err(error)) => {
                tracing::info!(term, "ambiguous fallback page skipped: {error}");
                FetchState::Done(FetchOutcome::Skipped)
            }
        }
    }
}
