//! Process counters exposed in Prometheus text format on `/metrics`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    pub requests_total: AtomicU64,
    pub get_responses_total: AtomicU64,
    pub filter_runs_total: AtomicU64,
    pub renders_total: AtomicU64,
    pub tokens_issued_total: AtomicU64,
    pub tokens_redeemed_total: AtomicU64,
    pub tokens_rejected_total: AtomicU64,
    pub duplicates_rejected_total: AtomicU64,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            get_responses_total: AtomicU64::new(0),
            filter_runs_total: AtomicU64::new(0),
            renders_total: AtomicU64::new(0),
            tokens_issued_total: AtomicU64::new(0),
            tokens_redeemed_total: AtomicU64::new(0),
            tokens_rejected_total: AtomicU64::new(0),
            duplicates_rejected_total: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub fn render(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 8] = [
            ("linkhub_requests_total", "Requests answered by a JSON handler", &self.requests_total),
            ("linkhub_get_responses_total", "GET responses seen by the request log filter", &self.get_responses_total),
            ("linkhub_filter_runs_total", "Response filter invocations", &self.filter_runs_total),
            ("linkhub_renders_total", "Markdown documents rendered", &self.renders_total),
            ("linkhub_tokens_issued_total", "Two-factor tokens issued", &self.tokens_issued_total),
            ("linkhub_tokens_redeemed_total", "Two-factor tokens redeemed", &self.tokens_redeemed_total),
            ("linkhub_tokens_rejected_total", "Unknown, expired or replayed token redemptions", &self.tokens_rejected_total),
            ("linkhub_duplicates_rejected_total", "Submissions rejected by the double-submission guard", &self.duplicates_rejected_total),
        ];
        let mut buf = String::new();
        for (name, help, counter) in counters {
            writeln!(&mut buf, "# HELP {} {}", name, help).ok();
            writeln!(&mut buf, "# TYPE {} counter", name).ok();
            writeln!(&mut buf, "{} {}", name, counter.load(Ordering::Relaxed)).ok();
        }
        writeln!(
            &mut buf,
            "# HELP linkhub_build_info Build information\n# TYPE linkhub_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "linkhub_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP linkhub_process_uptime_seconds Process uptime seconds\n# TYPE linkhub_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "linkhub_process_uptime_seconds {}",
            self.started.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}
