//! # Scrobble Eligibility
//!
//! last.fm's rule: a play counts once the track has been heard for more than half its
//! length, or for more than the minimum listen time (4 minutes by default), whichever
//! comes first. Half the length is measured as *unique* coverage so replaying the same
//! seconds cannot push a track over.
//!
//! On top of that, the wall clock must agree: the real time since the session started
//! has to exceed the triggering threshold minus a margin. This rejects sessions where
//! the player clock ran away from the polling clock (resume from sleep, fast-forward).

/// The numbers the decision is made from, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenMetrics {
    pub duration: f64,
    pub unique_coverage: f64,
    pub listened: f64,
    pub wall_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub eligible: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EligibilityPolicy {
    pub min_listen_time: f64,
    pub real_time_error_margin: f64,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            min_listen_time: 240.0,
            real_time_error_margin: 10.0,
        }
    }
}

impl EligibilityPolicy {
    pub fn new(min_listen_time: f64, real_time_error_margin: f64) -> Self {
        Self {
            min_listen_time,
            real_time_error_margin,
        }
    }

    pub fn evaluate(&self, metrics: &ListenMetrics) -> Verdict {
        let half = metrics.duration / 2.0;
        let (threshold, reason) = if metrics.unique_coverage > half {
            (half, "it covered over half the track uniquely")
        } else if metrics.listened > self.min_listen_time {
            (
                self.min_listen_time,
                "it has been listened to for over the minimum listen time",
            )
        } else {
            return Verdict {
                eligible: false,
                reason: "it did not pass either listen condition".to_string(),
            };
        };

        if metrics.wall_seconds > threshold - self.real_time_error_margin {
            Verdict {
                eligible: true,
                reason: reason.to_string(),
            }
        } else {
            Verdict {
                eligible: false,
                reason: "while it did pass the time condition, the real time did not pass"
                    .to_string(),
            }
        }
    }

    /// One-line statistics for the decision log.
    pub fn describe(&self, metrics: &ListenMetrics) -> String {
        format!(
            "listened for {:.2}, unique: {:.2}, real: {:.2}, half len: {:.2}, min: {}",
            metrics.listened,
            metrics.unique_coverage,
            metrics.wall_seconds,
            metrics.duration / 2.0,
            self.min_listen_time
        )
    }
}
