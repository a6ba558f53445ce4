//! The mem-check metric and its parser.
//!
//! A `/check` response reports one or more counters as lines of the form
//! `count[<index>] is <value>`; the metric is the sum of the values.
//! A response without any counter is *unmeasurable*, which is kept
//! distinct from a low (uncontended) reading.
use std::fmt;
use std::sync::OnceLock;

use ordered_float::OrderedFloat;
use regex::Regex;

/// Contention evidence; higher means more contention observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Metric(OrderedFloat<f64>);

impl Metric {
    /// Positive infinity, used when the oracle gave no usable reading.
    pub const UNMEASURABLE: Metric = Metric(OrderedFloat(f64::INFINITY));

    pub fn new(value: f64) -> Metric {
        Metric(OrderedFloat::from(value))
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }

    pub fn is_measurable(&self) -> bool {
        self.value().is_finite()
    }

    /// Returns true for a measurable metric at or above `threshold`.
    ///
    /// Ties count as exceeding.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.is_measurable() && self.value() >= threshold
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_measurable() {
            write!(f, "{}", self.value())
        } else {
            write!(f, "unmeasurable")
        }
    }
}

fn counter_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"count\[\d+\]\s+is\s+(\d+)")
            .expect("counter pattern is a valid regex")
    })
}

/// Parses a `/check` body into a metric.
///
/// # Examples
///
/// ```
/// use colocate::oracle::metric::{parse_metric, Metric};
///
/// assert_eq!(parse_metric("count[0] is 500\ncount[1] is 300"), Metric::new(800.));
/// assert_eq!(parse_metric("no counters here"), Metric::UNMEASURABLE);
/// ```
pub fn parse_metric(text: &str) -> Metric {
    let counts = counter_pattern()
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .collect::<Vec<_>>();

    if counts.is_empty() {
        return Metric::UNMEASURABLE;
    }
    Metric::new(counts.iter().fold(0u64, |acc, c| acc.saturating_add(*c)) as f64)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_all_counters() {
        assert_eq!(parse_metric("count[0] is 500\ncount[1] is 300").value(), 800.);
        let noisy = "warming up\ncount[0]   is 12 cycles\nfoo count[7] is 30\n";
        assert_eq!(parse_metric(noisy).value(), 42.);
    }

    #[test]
    fn no_counter_is_unmeasurable() {
        assert_eq!(parse_metric(""), Metric::UNMEASURABLE);
        assert_eq!(parse_metric("count[] is 5\ncount[0] is\n"), Metric::UNMEASURABLE);
        assert!(!parse_metric("error").is_measurable());
    }

    #[test]
    fn zero_is_a_measurement() {
        let m = parse_metric("count[0] is 0");
        assert!(m.is_measurable());
        assert_eq!(m.value(), 0.);
    }

    #[test]
    fn exceeds_keeps_ties_and_rejects_unmeasurable() {
        assert!(Metric::new(1000.).exceeds(1000.));
        assert!(!Metric::new(999.).exceeds(1000.));
        assert!(!Metric::UNMEASURABLE.exceeds(1000.));
        assert!(Metric::UNMEASURABLE > Metric::new(1e12));
    }
}
