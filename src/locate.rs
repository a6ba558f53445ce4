//! Target victim localization.
//!
//! Phase 1 fires `/lock` at every representative of an architecture set
//! and watches the victim's median response time; the first set pushing
//! it to the latency threshold becomes the candidate set. Phase 2 bisects
//! the candidate set: lock the left half, keep it if the victim slows
//! down, otherwise keep the right half, until one instance is left.
//!
//! Every step is a single decision against a fixed threshold, so a
//! miscalibrated threshold loses half of the candidates at once.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use crate::architecture::CpuSet;
use crate::error::Result;
use crate::observation::{record, Observation, ObservationLog};
use crate::oracle::ContentionOracle;
use crate::settings::Settings;

/// Median of the successful samples in seconds; `+inf` when all failed.
pub fn median_latency(samples: &[Option<Duration>]) -> f64 {
    let mut secs = samples.iter()
                          .filter_map(|s| s.map(|d| OrderedFloat::from(d.as_secs_f64())))
                          .collect::<Vec<_>>();
    if secs.is_empty() {
        return f64::INFINITY;
    }
    secs.sort();

    let mid = secs.len() / 2;
    if secs.len() % 2 == 1 {
        secs[mid].into_inner()
    } else {
        (secs[mid - 1].into_inner() + secs[mid].into_inner()) / 2.
    }
}

/// Returns the index of the first non-empty set for which `probe` (the
/// victim's median latency while the set's instances contend) reaches
/// `threshold`.
pub fn find_candidate_set<F>(sets: &[CpuSet], threshold: f64, mut probe: F) -> Option<usize>
where F: FnMut(&[String]) -> f64 {
    for (i, set) in sets.iter().enumerate() {
        if set.instances.is_empty() {
            info!(set = i, "skipping empty cpu set");
            continue;
        }
        info!(set = i, cpu_brand = ?set.cpu_brand, parsed_freq = ?set.parsed_freq,
              instances = set.instances.len(), "testing cpu set");

        let median = probe(&set.instances);
        info!(set = i, median, threshold, "full-set lock");
        if median >= threshold {
            return Some(i);
        }
    }
    None
}

/// Outcome of a bisection.
#[derive(Debug, Clone, PartialEq)]
pub struct Bisection {
    pub instance: String,
    /// Number of lock/measure rounds performed.
    pub rounds: usize,
}

/// Halves `candidates` until one is left, keeping the left half whenever
/// `probe` on it reaches `threshold`. Returns `None` for no candidates.
///
/// The left half is the smaller one, so a search ending on the right
/// can take fewer than `ceil(log2 n)` rounds; it takes exactly that many
/// when `n` is a power of two.
pub fn bisect<F>(candidates: &[String], threshold: f64, mut probe: F) -> Option<Bisection>
where F: FnMut(&[String]) -> f64 {
    let mut candidates = candidates;
    let mut rounds = 0;

    while candidates.len() > 1 {
        rounds += 1;
        let (left, right) = candidates.split_at(candidates.len() / 2);
        let median = probe(left);

        if median >= threshold {
            info!(round = rounds, median, threshold, kept = left.len(), "keeping left half");
            candidates = left;
        } else {
            info!(round = rounds, median, threshold, kept = right.len(), "keeping right half");
            candidates = right;
        }
    }

    candidates.first().map(|instance| Bisection { instance: instance.clone(), rounds })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Localization {
    /// `instance` of cpu set `set` shares a server with the victim.
    CoResident { set: usize, instance: String, rounds: usize },
    /// No cpu set slowed the victim down.
    NotFound,
}

/// Drives both phases against a victim URL.
pub struct Localizer<O> {
    oracle: Arc<O>,
    victim_url: String,
    threshold: f64,
    warmup: Duration,
    probe_runs: usize,
}

impl<O> Localizer<O>
where O: ContentionOracle + Send + 'static {
    /// Fails if the latency threshold is not set.
    pub fn new(oracle: Arc<O>, victim_url: &str, settings: &Settings) -> Result<Localizer<O>> {
        settings.validate()?;
        Ok(Localizer {
            oracle,
            victim_url: victim_url.to_string(),
            threshold: settings.require_latency_threshold()?,
            warmup: settings.lock_warmup,
            probe_runs: settings.probe_runs,
        })
    }

    /// Dispatches `/lock` to every URL without waiting for the responses.
    fn fire_locks(&self, urls: &[String]) {
        for (i, url) in urls.iter().enumerate() {
            let oracle = Arc::clone(&self.oracle);
            let url = url.clone();
            let spawned = thread::Builder::new()
                              .name(format!("lock-{}", i))
                              .spawn(move || oracle.trigger_contention(&url));
            if let Err(e) = spawned {
                warn!(error = %e, "could not dispatch lock");
            }
        }
    }

    /// Victim median latency while `urls` contend.
    pub fn contention_probe(&self, urls: &[String]) -> f64 {
        self.fire_locks(urls);
        thread::sleep(self.warmup);

        let samples = (0..self.probe_runs)
                          .map(|_| self.oracle.victim_latency(&self.victim_url))
                          .collect::<Vec<_>>();
        let median = median_latency(&samples);
        if !median.is_finite() {
            warn!(url = self.victim_url.as_str(), phase = "victim",
                  "all victim requests failed");
        }
        debug!(instances = urls.len(), runs = self.probe_runs, median, "victim probed");
        median
    }

    pub fn locate(&self, sets: &[CpuSet], log: &mut Option<ObservationLog>)
            -> Result<Localization> {
        info!(sets = sets.len(), threshold = self.threshold,
              victim = self.victim_url.as_str(), "starting victim localization");

        // A failing observation log must not interrupt the search; its
        // first error is reported at the end.
        let mut failure = None;
        let mut probe_phase = |phase: &str, urls: &[String]| {
            let median = self.contention_probe(urls);
            let observation = Observation {
                phase: phase.to_string(),
                lock: urls.join(" "),
                url: self.victim_url.clone(),
                instance_id: String::new(),
                value: median,
                accepted: median >= self.threshold,
            };
            if let Err(e) = record(log, observation) {
                failure.get_or_insert(e);
            }
            median
        };

        let set = match find_candidate_set(sets, self.threshold,
                                           |urls| probe_phase("phase1", urls)) {
            Some(set) => set,
            None => {
                warn!("no cpu set slowed the victim down; victim not localized");
                return match failure {
                    Some(e) => Err(e),
                    None => Ok(Localization::NotFound),
                };
            },
        };
        info!(set, "candidate set selected");

        let bisection = bisect(&sets[set].instances, self.threshold,
                               |urls| probe_phase("bisect", urls));
        if let Some(e) = failure {
            return Err(e);
        }

        Ok(match bisection {
            Some(Bisection { instance, rounds }) => {
                info!(instance = instance.as_str(), rounds, "suspected co-resident instance");
                Localization::CoResident { set, instance, rounds }
            },
            None => Localization::NotFound,
        })
    }
}
