use std::collections::HashMap;

use crate::wire::event::{GaugeSign, Observation, Value};

/// Single-writer aggregation state.
///
/// Only the sink task mutates this; producers hand observations over a
/// channel, so no locking is needed. Timer sequences keep the accumulated
/// sampled count in slot 0 and the observed values from slot 1 on.
#[derive(Debug, Default)]
pub struct Aggregator {
    pub counters: HashMap<String, f64>,
    pub gauges: HashMap<String, f64>,
    pub timers: HashMap<String, Vec<f64>>,
    pub sets: HashMap<String, Vec<String>>,
    /// Flush intervals elapsed per drained counter that still emits zeros.
    pub inactive_counters: HashMap<String, u32>,
    /// Flush intervals elapsed per drained timer `.count` key.
    pub inactive_timer_counts: HashMap<String, u32>,
    /// Observations accepted since the last flush.
    pub receive_count: u64,
    postfix: String,
    count_receives: bool,
}

impl Aggregator {
    /// Creates an empty aggregator. `postfix` must already be sanitized; it
    /// is needed to derive timer `.count` keys.
    pub fn new(postfix: &str, count_receives: bool) -> Self {
        Self {
            postfix: postfix.to_string(),
            count_receives,
            ..Default::default()
        }
    }

    pub fn postfix(&self) -> &str {
        &self.postfix
    }

    /// Derived Graphite key carrying a timer's sampled count. The postfix
    /// moves behind the `.count` suffix.
    pub fn timer_count_key(&self, bucket: &str) -> String {
        let stem = bucket.strip_suffix(&self.postfix).unwrap_or(bucket);
        format!("{stem}.count{}", self.postfix)
    }

    /// Applies one observation.
    ///
    /// A bucket receiving data leaves the inactivity maps, so a series is
    /// never both active and decaying.
    pub fn apply(&mut self, obs: Observation) {
        if self.count_receives {
            self.receive_count += 1;
        }

        match obs.value {
            Value::Counter(v) => {
                if !self.inactive_counters.is_empty() {
                    self.inactive_counters.remove(&obs.bucket);
                }
                *self.counters.entry(obs.bucket).or_insert(0.0) += v / f64::from(obs.sampling);
            }

            Value::Gauge(sign, v) => {
                let current = self.gauges.get(&obs.bucket).copied().unwrap_or(0.0);
                let next = match sign {
                    GaugeSign::Absolute => v,
                    GaugeSign::Add => (current + v).min(f64::MAX),
                    GaugeSign::Subtract => (current - v).max(0.0),
                };
                self.gauges.insert(obs.bucket, next);
            }

            Value::Timer(v) => {
                if !self.inactive_timer_counts.is_empty() {
                    let count_key = self.timer_count_key(&obs.bucket);
                    self.inactive_timer_counts.remove(&count_key);
                }
                let timer = self.timers.entry(obs.bucket).or_insert_with(|| vec![0.0]);
                timer[0] += f64::from(1.0 / obs.sampling);
                timer.push(v);
            }

            Value::Set(token) => {
                self.sets.entry(obs.bucket).or_default().push(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(bucket: &str, value: Value, sampling: f32) -> Observation {
        Observation {
            bucket: bucket.to_string(),
            value,
            sampling,
        }
    }

    #[test]
    fn test_apply_counter() {
        let mut agg = Aggregator::default();
        agg.apply(obs("gorets", Value::Counter(100.0), 1.0));
        assert_eq!(agg.counters["gorets"], 100.0);

        agg.apply(obs("gorets", Value::Counter(3.0), 1.0));
        assert_eq!(agg.counters["gorets"], 103.0);

        agg.apply(obs("gorets", Value::Counter(-104.0), 1.0));
        assert_eq!(agg.counters["gorets"], -1.0);
    }

    #[test]
    fn test_apply_counter_sampling_correction() {
        let mut agg = Aggregator::default();
        agg.apply(obs("gorets", Value::Counter(2.0), 0.25));
        assert_eq!(agg.counters["gorets"], 8.0);

        agg.apply(obs("gorets", Value::Counter(2.0), 0.1));
        // The rate travels as f32, so the correction is only as exact as
        // the widened 0.1 allows.
        assert!((agg.counters["gorets"] - 28.0).abs() < 1e-5);
    }

    #[test]
    fn test_apply_gauge_absolute_then_deltas() {
        let mut agg = Aggregator::default();
        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Absolute, 333.0), 1.0));
        assert_eq!(agg.gauges["gaugor"], 333.0);

        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Subtract, 10.0), 1.0));
        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Add, 4.0), 1.0));
        assert_eq!(agg.gauges["gaugor"], 327.0);
    }

    #[test]
    fn test_apply_gauge_delta_without_prior_value() {
        let mut agg = Aggregator::default();
        agg.apply(obs("fresh", Value::Gauge(GaugeSign::Add, 5.0), 1.0));
        assert_eq!(agg.gauges["fresh"], 5.0);
    }

    #[test]
    fn test_apply_gauge_subtract_clamps_at_zero() {
        let mut agg = Aggregator::default();
        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Absolute, 10.0), 1.0));
        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Subtract, 20.0), 1.0));
        assert_eq!(agg.gauges["gaugor"], 0.0);
    }

    #[test]
    fn test_apply_gauge_add_saturates_at_max() {
        let mut agg = Aggregator::default();
        agg.apply(obs(
            "gaugor",
            Value::Gauge(GaugeSign::Absolute, f64::MAX),
            1.0,
        ));
        agg.apply(obs("gaugor", Value::Gauge(GaugeSign::Add, f64::MAX), 1.0));
        assert_eq!(agg.gauges["gaugor"], f64::MAX);
    }

    #[test]
    fn test_apply_timer_keeps_sampled_count_in_slot_zero() {
        let mut agg = Aggregator::default();
        agg.apply(obs("glork", Value::Timer(320.0), 1.0));
        assert_eq!(agg.timers["glork"], vec![1.0, 320.0]);

        agg.apply(obs("glork", Value::Timer(100.0), 0.5));
        assert_eq!(agg.timers["glork"], vec![3.0, 320.0, 100.0]);
    }

    #[test]
    fn test_apply_set_appends_raw_tokens() {
        let mut agg = Aggregator::default();
        agg.apply(obs("uniques", Value::Set("765".into()), 1.0));
        agg.apply(obs("uniques", Value::Set("765".into()), 1.0));
        assert_eq!(agg.sets["uniques"], vec!["765", "765"]);
    }

    #[test]
    fn test_apply_counter_clears_decay_entry() {
        let mut agg = Aggregator::default();
        agg.inactive_counters.insert("gorets".to_string(), 3);
        agg.apply(obs("gorets", Value::Counter(1.0), 1.0));
        assert!(!agg.inactive_counters.contains_key("gorets"));
        assert!(agg.counters.contains_key("gorets"));
    }

    #[test]
    fn test_apply_timer_clears_decay_entry() {
        let mut agg = Aggregator::new(".srv", false);
        agg.inactive_timer_counts
            .insert("glork.count.srv".to_string(), 2);
        agg.apply(obs("glork.srv", Value::Timer(10.0), 1.0));
        assert!(agg.inactive_timer_counts.is_empty());
    }

    #[test]
    fn test_timer_count_key_moves_postfix_behind_suffix() {
        let agg = Aggregator::new(".srv", false);
        assert_eq!(agg.timer_count_key("glork.srv"), "glork.count.srv");

        let agg = Aggregator::default();
        assert_eq!(agg.timer_count_key("glork"), "glork.count");
    }

    #[test]
    fn test_receive_count_gated_on_configuration() {
        let mut agg = Aggregator::new("", true);
        agg.apply(obs("gorets", Value::Counter(1.0), 1.0));
        agg.apply(obs("glork", Value::Timer(1.0), 1.0));
        assert_eq!(agg.receive_count, 2);

        let mut agg = Aggregator::new("", false);
        agg.apply(obs("gorets", Value::Counter(1.0), 1.0));
        assert_eq!(agg.receive_count, 0);
    }
}
