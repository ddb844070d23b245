//! Pipeline statistics.

use std::time::Duration;

use ingestion::MetricsSnapshot;
use observability::MetricsSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Simulated robot instances
    pub robots: usize,

    /// Tracks published to the registry
    pub tracks_published: usize,

    /// Sample counters from the robot adapters
    pub samples: MetricsSnapshot,

    /// Samples dropped because a sync worker queue was full
    pub samples_dropped_by_sync: u64,

    pub recordings_saved: u64,
    pub recordings_failed: u64,
    pub frames_recorded: u64,

    /// Broker connections still open at shutdown
    pub open_connections: usize,

    /// Per robot preview summaries
    pub previews: Vec<(String, MetricsSummary)>,
}

impl PipelineStats {
    /// Samples per second accepted from the robots
    pub fn sample_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.samples.samples_received as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of received samples that never reached a sync worker, in percent
    pub fn loss_rate(&self) -> f64 {
        let received = self.samples.samples_received;
        if received == 0 {
            return 0.0;
        }
        let lost = self.samples.samples_dropped + self.samples.samples_failed;
        (lost as f64 / received as f64) * 100.0
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Robots: {}", self.robots);
        println!("   ├─ Tracks published: {}", self.tracks_published);
        println!("   └─ Open connections: {}", self.open_connections);

        println!("\nSamples");
        println!("   ├─ Received: {}", self.samples.samples_received);
        println!("   ├─ Rate: {:.1}/s", self.sample_rate());
        println!("   ├─ Dropped: {}", self.samples.samples_dropped);
        println!("   ├─ Failed: {}", self.samples.samples_failed);
        println!("   ├─ Dropped by sync: {}", self.samples_dropped_by_sync);
        println!("   └─ Loss rate: {:.2}%", self.loss_rate());

        if self.recordings_saved + self.recordings_failed > 0 {
            println!("\nRecordings");
            println!("   ├─ Saved: {}", self.recordings_saved);
            println!("   ├─ Failed: {}", self.recordings_failed);
            println!("   └─ Frames: {}", self.frames_recorded);
        }

        for (robot, summary) in &self.previews {
            println!("\nPreview {robot}");
            for line in summary.to_string().lines() {
                println!("   {line}");
            }
        }

        println!();
    }
}
