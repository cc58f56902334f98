//! Fallback policy for failed acquisitions
//!
//! Transient network faults are retried inside the engine (`retries`,
//! `fragment_retries`). This module handles the failures the engine gives up
//! on but that a changed request may still fix:
//!
//! - the selected format is no longer offered → one attempt with a relaxed
//!   selection
//! - the site answers 403 → one attempt per configured browser, borrowing its
//!   cookies
//!
//! A fallback attempt's own failure never triggers another fallback.

use crate::engine::DownloadPlan;
use crate::error::EngineError;
use crate::types::Task;
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Classification of a terminal engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The requested encoding is not offered (any more)
    FormatUnavailable,
    /// The site refused access (HTTP 403)
    AccessDenied,
    /// Anything else
    Other,
}

// Both patterns are literals and always compile
#[allow(clippy::unwrap_used)]
fn patterns() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"(?i)requested format (is )?not available").unwrap(),
            Regex::new(r"(?i)\b403\b|forbidden").unwrap(),
        )
    })
}

impl FailureClass {
    /// Classify an engine failure message
    pub fn classify(message: &str) -> Self {
        let (format, denied) = patterns();
        if format.is_match(message) {
            FailureClass::FormatUnavailable
        } else if denied.is_match(message) {
            FailureClass::AccessDenied
        } else {
            FailureClass::Other
        }
    }
}

/// Changes applied to the request for one fallback attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOverrides {
    /// Replacement plan
    pub plan: Option<DownloadPlan>,
    /// Browser to borrow cookies from
    pub cookies_from_browser: Option<String>,
}

/// A fallback strategy chosen for a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Retry once with a relaxed format selection
    RelaxedFormat {
        /// The relaxed plan
        plan: DownloadPlan,
    },
    /// Retry once per browser with its cookies
    BrowserCookies {
        /// Browsers, in order
        browsers: Vec<String>,
    },
}

impl Fallback {
    /// Pick the fallback for `class`, if any applies
    pub fn plan(
        class: FailureClass,
        task: &Task,
        merge_available: bool,
        browsers: &[String],
    ) -> Option<Self> {
        match class {
            FailureClass::FormatUnavailable if !task.wants_audio_container() => {
                Some(Fallback::RelaxedFormat {
                    plan: DownloadPlan::relaxed(&task.output_format, merge_available),
                })
            }
            FailureClass::AccessDenied if !browsers.is_empty() => Some(Fallback::BrowserCookies {
                browsers: browsers.to_vec(),
            }),
            _ => None,
        }
    }

    /// The attempts this fallback makes, in order
    pub fn attempts(&self) -> Vec<AttemptOverrides> {
        match self {
            Fallback::RelaxedFormat { plan } => vec![AttemptOverrides {
                plan: Some(plan.clone()),
                cookies_from_browser: None,
            }],
            Fallback::BrowserCookies { browsers } => browsers
                .iter()
                .map(|browser| AttemptOverrides {
                    plan: None,
                    cookies_from_browser: Some(browser.clone()),
                })
                .collect(),
        }
    }
}

/// Run the attempts of `fallback` until one succeeds
///
/// Stops at the first success or interruption. When every attempt fails, the
/// last attempt's error is returned.
pub async fn run_fallback<F, Fut, T>(fallback: &Fallback, mut attempt: F) -> Result<T, EngineError>
where
    F: FnMut(AttemptOverrides) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut last_error = EngineError::Failed("no fallback attempt was made".to_string());

    for overrides in fallback.attempts() {
        debug!(
            selector = overrides.plan.as_ref().map(|p| p.selector()),
            browser = overrides.cookies_from_browser.as_deref(),
            "running fallback attempt"
        );
        match attempt(overrides).await {
            Ok(value) => {
                info!("fallback attempt succeeded");
                return Ok(value);
            }
            Err(EngineError::Interrupted) => return Err(EngineError::Interrupted),
            Err(e) => {
                debug!(error = %e, "fallback attempt failed");
                last_error = e;
            }
        }
    }

    Err(last_error)
}
