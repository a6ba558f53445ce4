//! Concurrent probing and reduction of repeated observations.
//!
//! A batch of oracle calls is a barrier: `fan_out` returns only once every
//! dispatched call has returned (each bounded by its own HTTP timeout).
//! Reduction happens afterwards, on the calling thread.
use std::collections::HashMap;

use crossbeam_channel::unbounded;
use rayon::ThreadPoolBuilder;

use crate::error::Result;
use crate::oracle::{ContentionOracle, InstanceId, Metric};

/// Runs `task` on each item over at most `workers` threads, and returns
/// the results in the same order as `items`.
pub fn fan_out<T, R, F>(items: &[T], workers: usize, task: F) -> Result<Vec<R>>
where T: Sync, R: Send, F: Fn(&T) -> R + Sync {
    if items.is_empty() {
        return Ok(vec![]);
    }
    let pool = ThreadPoolBuilder::new()
                   .num_threads(workers.max(1).min(items.len()))
                   .thread_name(|i| format!("probe-{}", i))
                   .build()?;

    let (tx, rx) = unbounded();
    let task = &task;
    pool.scope(|s| {
        for (i, item) in items.iter().enumerate() {
            let tx = tx.clone();
            s.spawn(move |_| {
                // The receiver outlives the scope.
                let _ = tx.send((i, task(item)));
            });
        }
    });
    drop(tx);

    let mut results = (0..items.len()).map(|_| None).collect::<Vec<Option<R>>>();
    for (i, r) in rx.iter() {
        results[i] = Some(r);
    }
    Ok(results.into_iter().flatten().collect())
}

/// One `/check` observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub url: String,
    pub instance: InstanceId,
    pub metric: Metric,
}

/// Returns the stronger evidence of the two; unmeasurable loses to any
/// measurement.
fn stronger(a: Metric, b: Metric) -> Metric {
    match (a.is_measurable(), b.is_measurable()) {
        (true, false) => a,
        (false, true) => b,
        _ => a.max(b),
    }
}

/// The observations of one batch, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct ProbeBatch {
    probes: Vec<Probe>,
}

impl From<Vec<Probe>> for ProbeBatch {
    fn from(probes: Vec<Probe>) -> ProbeBatch {
        ProbeBatch { probes }
    }
}

impl ProbeBatch {
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Maps every probed URL to its strongest attributed observation.
    ///
    /// Unattributed probes are discarded, so a URL none of whose probes
    /// could be attributed is absent. A URL stays unmeasurable only if all
    /// of its attributed probes were.
    pub fn by_url(&self) -> HashMap<String, (InstanceId, Metric)> {
        let mut out: HashMap<String, (InstanceId, Metric)> = HashMap::new();
        for p in self.probes.iter().filter(|p| p.instance.known().is_some()) {
            match out.get_mut(&p.url) {
                Some(entry) => {
                    if stronger(entry.1, p.metric) != entry.1 {
                        *entry = (p.instance.clone(), p.metric);
                    }
                },
                None => {
                    out.insert(p.url.clone(), (p.instance.clone(), p.metric));
                },
            }
        }
        out
    }

    /// Maximum measurable metric per identified instance.
    ///
    /// Unattributed and unmeasurable probes are discarded.
    pub fn by_instance(&self) -> HashMap<String, Metric> {
        let mut out: HashMap<String, Metric> = HashMap::new();
        for p in &self.probes {
            let id = match p.instance.known() {
                Some(id) => id,
                None => continue,
            };
            if !p.metric.is_measurable() {
                continue;
            }
            let m = out.entry(id.to_string()).or_insert(p.metric);
            *m = (*m).max(p.metric);
        }
        out
    }
}

/// Sends one `/check` per URL concurrently and collects every result.
///
/// URLs may repeat (several probes of a shared URL).
pub fn probe_all<O>(urls: &[String], oracle: &O, max_workers: usize) -> Result<ProbeBatch>
where O: ContentionOracle {
    let probes = fan_out(urls, max_workers, |url| {
        let (instance, metric) = oracle.measure_metric(url);
        Probe { url: url.clone(), instance, metric }
    })?;
    Ok(ProbeBatch::from(probes))
}
