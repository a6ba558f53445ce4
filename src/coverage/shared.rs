//! Server coverage identification behind a single shared URL.
//!
//! The `/lock` request cannot be aimed at a chosen instance, so the lock
//! instance `I` is learnt afterwards with an identity probe. Iterations in
//! which `I` is unknown or already grouped are discarded without touching
//! the remaining set. Otherwise many `/check` requests are sprayed at the
//! shared URL, their metrics are reduced per instance with `max`, and
//! `I` is grouped with every remaining instance at or above the
//! threshold. There is no reverification round: routing is re-randomized
//! on every iteration anyway.
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregate::{fan_out, probe_all};
use crate::coverage::{unique_in_order, ServerGroup};
use crate::error::{Error, Result};
use crate::observation::{record, Observation, ObservationLog};
use crate::oracle::ContentionOracle;
use crate::settings::Settings;

pub struct SharedUrlIdentifier<'a, O: ContentionOracle> {
    oracle: &'a O,
    url: String,
    threshold: f64,
    settle_delay: Duration,
    check_requests: usize,
    max_workers: usize,
    max_stale_locks: usize,
}

impl<'a, O: ContentionOracle> SharedUrlIdentifier<'a, O> {
    /// Fails if the coverage threshold is not set.
    pub fn new(oracle: &'a O, url: &str, settings: &Settings)
            -> Result<SharedUrlIdentifier<'a, O>> {
        settings.validate()?;
        Ok(SharedUrlIdentifier {
            oracle,
            url: url.to_string(),
            threshold: settings.require_coverage_threshold()?,
            settle_delay: settings.settle_delay,
            check_requests: settings.check_requests,
            max_workers: settings.max_workers,
            max_stale_locks: settings.max_stale_locks,
        })
    }

    /// Partitions the known `instance_ids` into server-sharing groups.
    pub fn identify(&self, instance_ids: &[String], log: &mut Option<ObservationLog>)
            -> Result<Vec<ServerGroup>> {
        let mut remaining = unique_in_order(instance_ids);
        let mut groups = vec![];
        let mut stale = 0;

        info!(instances = remaining.len(), threshold = self.threshold,
              url = self.url.as_str(), "starting shared-URL server identification");

        while !remaining.is_empty() {
            if remaining.len() == 1 {
                info!(instance = remaining[0].as_str(), "one instance left; singleton group");
                groups.push(ServerGroup::singleton(&remaining[0]));
                break;
            }

            self.oracle.trigger_contention(&self.url);
            let handler = self.oracle.identify_handler(&self.url);

            let lock_id = match handler.known() {
                Some(id) if remaining.iter().any(|r| r == id) => id.to_string(),
                other => {
                    stale += 1;
                    match other {
                        Some(id) => info!(instance = id, "lock landed on a grouped instance; retrying"),
                        None => warn!(phase = "lock", "lock handler unknown; retrying"),
                    }
                    if stale >= self.max_stale_locks {
                        return Err(Error::StaleLockLimit {
                            attempts: stale,
                            remaining: remaining.len(),
                        });
                    }
                    continue;
                },
            };
            stale = 0;
            info!(remaining = remaining.len(), lock = lock_id.as_str(), "next iteration");

            thread::sleep(self.settle_delay);
            let urls = vec![self.url.clone(); self.check_requests];
            let metrics = probe_all(&urls, self.oracle, self.max_workers)?.by_instance();

            let mut members = vec![lock_id.clone()];
            for id in remaining.iter().filter(|id| **id != lock_id) {
                let metric = match metrics.get(id) {
                    Some(m) => *m,
                    None => {
                        debug!(instance = id.as_str(), "not reached by any mem-check");
                        continue;
                    },
                };
                let accepted = metric.exceeds(self.threshold);
                debug!(instance = id.as_str(), %metric, accepted, "mem-check");
                record(log, Observation {
                    phase: "shared".to_string(),
                    lock: lock_id.clone(),
                    url: self.url.clone(),
                    instance_id: id.clone(),
                    value: metric.value(),
                    accepted,
                })?;
                if accepted {
                    members.push(id.clone());
                }
            }
            info!(lock = lock_id.as_str(), members = ?members, "committed group");

            remaining.retain(|id| !members.contains(id));
            groups.push(ServerGroup { lock_url: lock_id, members });
        }

        Ok(groups)
    }
}

/// Collects the distinct instance ids answering at `url`, over `requests`
/// concurrent identity probes.
pub fn discover_instances<O>(oracle: &O, url: &str, requests: usize, max_workers: usize)
        -> Result<Vec<String>>
where O: ContentionOracle {
    let urls = vec![url.to_string(); requests];
    let ids = fan_out(&urls, max_workers, |u| oracle.identify_handler(u))?;

    let mut seen = HashSet::new();
    let found = ids.iter()
                   .filter_map(|id| id.known())
                   .filter(|id| seen.insert(id.to_string()))
                   .map(String::from)
                   .collect::<Vec<_>>();
    info!(url, requests, instances = found.len(), "instance discovery finished");
    Ok(found)
}
