//! Run statistics
//!
//! One [`RunStats`] per worker, merged by the coordinator. Merging is
//! associative and commutative, so the order workers report in doesn't
//! matter.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::client::InvokeError;
use crate::gateway::types::TransferResponse;
use crate::store::SERIALIZATION_FAILURE;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Completed invocations
    pub calls: u64,
    pub success: u64,
    pub errors: u64,
    /// Errors whose code is the store's serialization-failure code
    pub conflict_errors: u64,

    pub latency_total_ms: u64,
    pub latency_samples: u64,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: u64,

    pub total_retries: u64,
    pub max_retries: u32,
    pub calls_with_retries: u64,

    /// `"<error> (<code>)"` → count
    pub error_kinds: HashMap<String, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one invocation into the totals. `elapsed` is the harness-side
    /// round trip, used when the response carries no server duration.
    pub fn record(&mut self, result: &Result<TransferResponse, InvokeError>, elapsed: Duration) {
        self.calls += 1;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.errors += 1;
                self.record_latency(elapsed.as_millis() as u64);
                *self
                    .error_kinds
                    .entry(format!("invocation failed: {err}"))
                    .or_insert(0) += 1;
                return;
            }
        };

        match &response.error {
            Some(error) => {
                self.errors += 1;
                let key = match &response.error_code {
                    Some(code) => {
                        if code == SERIALIZATION_FAILURE {
                            self.conflict_errors += 1;
                        }
                        format!("{error} ({code})")
                    }
                    None => error.clone(),
                };
                *self.error_kinds.entry(key).or_insert(0) += 1;
            }
            None => self.success += 1,
        }

        self.record_latency(
            response
                .duration
                .unwrap_or_else(|| elapsed.as_millis() as u64),
        );

        if let Some(retries) = response.retries {
            self.total_retries += retries as u64;
            self.max_retries = self.max_retries.max(retries);
            if retries > 0 {
                self.calls_with_retries += 1;
            }
        }
    }

    fn record_latency(&mut self, ms: u64) {
        self.latency_total_ms += ms;
        self.latency_samples += 1;
        self.min_latency_ms = Some(self.min_latency_ms.map_or(ms, |min| min.min(ms)));
        self.max_latency_ms = self.max_latency_ms.max(ms);
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.calls += other.calls;
        self.success += other.success;
        self.errors += other.errors;
        self.conflict_errors += other.conflict_errors;
        self.latency_total_ms += other.latency_total_ms;
        self.latency_samples += other.latency_samples;
        self.min_latency_ms = match (self.min_latency_ms, other.min_latency_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_latency_ms = self.max_latency_ms.max(other.max_latency_ms);
        self.total_retries += other.total_retries;
        self.max_retries = self.max_retries.max(other.max_retries);
        self.calls_with_retries += other.calls_with_retries;
        for (key, count) in &other.error_kinds {
            *self.error_kinds.entry(key.clone()).or_insert(0) += count;
        }
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        (self.latency_samples > 0).then(|| self.latency_total_ms as f64 / self.latency_samples as f64)
    }

    /// Percentage of completed calls that succeeded
    pub fn success_rate(&self) -> f64 {
        percent(self.success, self.calls)
    }

    /// Error breakdown, most frequent first (ties by key)
    pub fn sorted_errors(&self) -> Vec<(&str, u64)> {
        let mut errors: Vec<(&str, u64)> = self
            .error_kinds
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        errors
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Final result of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: RunStats,
    pub elapsed: Duration,
    /// Calls the run would have made without interruption
    pub planned_calls: u64,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.calls as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        let rule = "=".repeat(60);

        writeln!(f, "{rule}")?;
        writeln!(f, "STATS")?;
        writeln!(f, "{rule}")?;
        if self.interrupted {
            writeln!(f, "Interrupted after {} of {} planned calls", s.calls, self.planned_calls)?;
        }
        writeln!(f, "Total calls:        {}", s.calls)?;
        writeln!(f, "Successful:         {} ({:.2}%)", s.success, percent(s.success, s.calls))?;
        writeln!(f, "Errors:             {} ({:.2}%)", s.errors, percent(s.errors, s.calls))?;
        writeln!(f, "  OCC conflicts:    {}", s.conflict_errors)?;
        writeln!(f)?;
        writeln!(f, "Total time:         {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Throughput:         {:.0} calls/second", self.throughput())?;
        writeln!(f)?;

        if let (Some(min), Some(avg)) = (s.min_latency_ms, s.avg_latency_ms()) {
            writeln!(f, "Execution Times:")?;
            writeln!(f, "  Min:                {}ms", min)?;
            writeln!(f, "  Max:                {}ms", s.max_latency_ms)?;
            writeln!(f, "  Avg:                {:.2}ms", avg)?;
            writeln!(f)?;
        }

        let avg_retries = if s.calls > 0 {
            s.total_retries as f64 / s.calls as f64
        } else {
            0.0
        };
        writeln!(f, "OCC Retry Statistics:")?;
        writeln!(f, "  Total retries:      {}", s.total_retries)?;
        writeln!(f, "  Max retries:        {}", s.max_retries)?;
        writeln!(f, "  Avg retries/call:   {:.2}", avg_retries)?;
        writeln!(
            f,
            "  Transactions with retries: {} ({:.2}%)",
            s.calls_with_retries,
            percent(s.calls_with_retries, s.calls)
        )?;

        let errors = s.sorted_errors();
        if !errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Error Breakdown:")?;
            for (kind, count) in errors {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }
        Ok(())
    }
}
