//! Stream ingestion metrics
//!
//! Recorded through the `metrics` facade; they are no-ops unless the
//! embedding application installs a recorder.
//!
//! # Metrics
//!
//! - `personachat_streams_total`: Counter of streams started
//! - `personachat_streams_active`: Gauge of streams in flight
//! - `personachat_stream_chunks_total`: Counter of body chunks received
//! - `personachat_stream_duration_seconds`: Histogram of stream duration by outcome
//! - `personachat_stream_failures_total`: Counter of failed streams by reason
//! - `personachat_tokens_recorded`: Counter of tokens recorded by direction and source
//!
//! # Examples
//!
//! ```
//! use personachat::ingest::metrics::StreamMetrics;
//!
//! let mut metrics = StreamMetrics::new("einstein");
//! metrics.record_chunk();
//! metrics.record_completion("completed");
//! ```

use metrics::{counter, decrement_gauge, histogram, increment_counter, increment_gauge};
use std::time::Instant;

/// Metrics for one ingested stream
///
/// Completion is recorded at most once; dropping an unrecorded tracker still
/// releases the active-stream gauge.
#[derive(Debug)]
pub struct StreamMetrics {
    persona: String,
    start: Instant,
    chunks: u64,
    recorded: bool,
}

impl StreamMetrics {
    /// Starts tracking a stream answered by `persona`
    pub fn new(persona: impl Into<String>) -> Self {
        let persona = persona.into();
        increment_counter!("personachat_streams_total", "persona" => persona.clone());
        increment_gauge!("personachat_streams_active", 1.0);

        Self {
            persona,
            start: Instant::now(),
            chunks: 0,
            recorded: false,
        }
    }

    /// Counts one received body chunk
    pub fn record_chunk(&mut self) {
        self.chunks += 1;
        increment_counter!("personachat_stream_chunks_total", "persona" => self.persona.clone());
    }

    /// Counts tokens written to the usage store
    ///
    /// # Arguments
    ///
    /// * `input` - Prompt tokens
    /// * `output` - Generated tokens
    /// * `source` - Where the counts came from ("metadata" or "headers")
    pub fn record_tokens(&self, input: u64, output: u64, source: &str) {
        counter!(
            "personachat_tokens_recorded",
            input,
            "direction" => "input",
            "source" => source.to_string()
        );
        counter!(
            "personachat_tokens_recorded",
            output,
            "direction" => "output",
            "source" => source.to_string()
        );
    }

    /// Records the end of the stream
    pub fn record_completion(&mut self, outcome: &str) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        histogram!(
            "personachat_stream_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "outcome" => outcome.to_string()
        );
        decrement_gauge!("personachat_streams_active", 1.0);
    }

    /// Records a failed stream
    pub fn record_failure(&mut self, reason: &str) {
        if self.recorded {
            return;
        }
        increment_counter!("personachat_stream_failures_total", "reason" => reason.to_string());
        self.record_completion(reason);
    }

    /// Chunks received so far
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Elapsed time since the stream started
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        if !self.recorded {
            decrement_gauge!("personachat_streams_active", 1.0);
        }
    }
}
