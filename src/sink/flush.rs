use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::config::{Config, Percentile};

use super::state::Aggregator;

/// One rendered flush: Graphite plaintext plus the emitted line count.
#[derive(Debug, Default)]
pub struct FlushPayload {
    pub data: String,
    pub lines: u64,
}

/// Renders aggregator state into Graphite plaintext and advances the decay
/// bookkeeping.
///
/// Counters, timers, and sets are drained; gauges persist unless configured
/// otherwise. Values are formatted with minimal digits and timestamps are
/// integral Unix seconds.
#[derive(Debug, Clone)]
pub struct Flusher {
    percentiles: Vec<Percentile>,
    delete_gauges: bool,
    persist_count_keys: u32,
    persist_timer_counts: u32,
    receive_counter: Option<String>,
}

impl Flusher {
    pub fn new(cfg: &Config) -> Self {
        Self {
            percentiles: cfg.percentiles.clone(),
            delete_gauges: cfg.delete_gauges,
            persist_count_keys: cfg.persist_count_keys,
            persist_timer_counts: cfg.persist_timer_counts,
            receive_counter: (!cfg.receive_counter.is_empty())
                .then(|| cfg.receive_counter.clone()),
        }
    }

    /// Renders one flush at timestamp `now` (Unix seconds).
    pub fn render(&self, agg: &mut Aggregator, now: i64) -> FlushPayload {
        let mut out = FlushPayload::default();

        self.render_counters(agg, now, &mut out);
        self.render_counter_decay(agg, now, &mut out);
        self.render_gauges(agg, now, &mut out);
        self.render_sets(agg, now, &mut out);
        self.render_timers(agg, now, &mut out);
        self.render_timer_decay(agg, now, &mut out);
        self.render_receive_count(agg, now, &mut out);

        out
    }

    fn render_counters(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        for (bucket, value) in std::mem::take(&mut agg.counters) {
            let _ = writeln!(out.data, "{bucket} {value} {now}");
            out.lines += 1;
            if self.persist_count_keys > 0 {
                agg.inactive_counters.insert(bucket, 0);
            }
        }
    }

    /// Emits zero lines for drained counters until they have been idle for
    /// `persist_count_keys` intervals.
    ///
    /// Entries inserted at 0 during this flush skip emission and start
    /// producing zeros on the next one.
    fn render_counter_decay(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        decay(
            &mut agg.inactive_counters,
            self.persist_count_keys,
            now,
            out,
        );
    }

    fn render_gauges(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        if self.delete_gauges {
            for (bucket, value) in std::mem::take(&mut agg.gauges) {
                let _ = writeln!(out.data, "{bucket} {value} {now}");
                out.lines += 1;
            }
        } else {
            for (bucket, value) in &agg.gauges {
                let _ = writeln!(out.data, "{bucket} {value} {now}");
                out.lines += 1;
            }
        }
    }

    fn render_sets(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        for (bucket, tokens) in std::mem::take(&mut agg.sets) {
            let distinct = tokens.iter().collect::<HashSet<_>>().len();
            let _ = writeln!(out.data, "{bucket} {distinct} {now}");
            out.lines += 1;
        }
    }

    fn render_timers(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        let postfix = agg.postfix().to_owned();

        for (bucket, mut timer) in std::mem::take(&mut agg.timers) {
            // Slot 0 is the sampled count; the observed values follow.
            let sampled = timer[0];
            let times = &mut timer[1..];
            times.sort_unstable_by(f64::total_cmp);

            let count = times.len();
            let min = times[0];
            let max = times[count - 1];
            let sum: f64 = times.iter().sum();
            let mean = sum / count as f64;

            let stem = bucket.strip_suffix(postfix.as_str()).unwrap_or(&bucket);

            let mut threshold = max;
            for pct in &self.percentiles {
                if count > 1 {
                    let fraction = if pct.value() >= 0.0 {
                        pct.value()
                    } else {
                        100.0 + pct.value()
                    };
                    let mut index = (fraction / 100.0 * count as f64 + 0.5).floor() as i64;
                    if pct.value() >= 0.0 {
                        // Convert from a 1-based count to a 0-based index.
                        index -= 1;
                    }
                    let index = index.clamp(0, count as i64 - 1) as usize;
                    threshold = times[index];
                }

                let (kind, label) = if pct.value() >= 0.0 {
                    ("upper", pct.label())
                } else {
                    ("lower", pct.label().trim_start_matches('-'))
                };
                let _ = writeln!(out.data, "{stem}.{kind}_{label}{postfix} {threshold} {now}");
                out.lines += 1;
            }

            let _ = writeln!(out.data, "{stem}.mean{postfix} {mean} {now}");
            let _ = writeln!(out.data, "{stem}.upper{postfix} {max} {now}");
            let _ = writeln!(out.data, "{stem}.lower{postfix} {min} {now}");
            let _ = writeln!(out.data, "{stem}.count{postfix} {sampled} {now}");
            out.lines += 4;

            if self.persist_timer_counts > 0 {
                agg.inactive_timer_counts
                    .insert(format!("{stem}.count{postfix}"), 0);
            }
        }
    }

    fn render_timer_decay(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        decay(
            &mut agg.inactive_timer_counts,
            self.persist_timer_counts,
            now,
            out,
        );
    }

    /// The receive counter bypasses prefix/postfix and is reset every flush.
    fn render_receive_count(&self, agg: &mut Aggregator, now: i64, out: &mut FlushPayload) {
        let Some(name) = &self.receive_counter else {
            return;
        };

        if agg.receive_count > 0 {
            let _ = writeln!(out.data, "{name} {} {now}", agg.receive_count);
            out.lines += 1;
            if self.persist_count_keys > 0 {
                // The decay sweep already ran this flush; start at one
                // elapsed interval so the first zero lands on the next one.
                agg.inactive_counters.insert(name.clone(), 1);
            }
        }

        agg.receive_count = 0;
    }
}

/// Shared decay sweep: emit a zero line for every entry that has already
/// sat out a full interval, then drop entries that reached `persist` and
/// advance the rest.
fn decay(entries: &mut HashMap<String, u32>, persist: u32, now: i64, out: &mut FlushPayload) {
    let data = &mut out.data;
    let lines = &mut out.lines;

    entries.retain(|bucket, elapsed| {
        if *elapsed > 0 {
            let _ = writeln!(data, "{bucket} 0 {now}");
            *lines += 1;
        }

        if *elapsed >= persist {
            false
        } else {
            *elapsed += 1;
            true
        }
    });
}
