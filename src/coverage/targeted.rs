//! Server coverage identification when every instance has its own URL.
//!
//! Per iteration:
//!   1. Pick a lock instance `L` from the remaining set.
//!   2. Round 1: `/lock` on `L`, then `/check` every other remaining URL;
//!      those at or above the threshold are candidates.
//!   3. Round 2: `/lock` on `L` again, `/check` the candidates only; keep
//!      those that exceed the threshold again.
//!   4. Commit `{L} ∪ verified` and remove it from the remaining set.
//!
//! Candidates failing reverification stay in the remaining set.
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregate::probe_all;
use crate::coverage::{unique_in_order, ServerGroup};
use crate::error::Result;
use crate::observation::{record, Observation, ObservationLog};
use crate::oracle::ContentionOracle;
use crate::settings::Settings;

pub struct CoverageIdentifier<'a, O: ContentionOracle> {
    oracle: &'a O,
    threshold: f64,
    settle_delay: Duration,
    max_workers: usize,
}

impl<'a, O: ContentionOracle> CoverageIdentifier<'a, O> {
    /// Fails if the coverage threshold is not set.
    pub fn new(oracle: &'a O, settings: &Settings) -> Result<CoverageIdentifier<'a, O>> {
        settings.validate()?;
        Ok(CoverageIdentifier {
            oracle,
            threshold: settings.require_coverage_threshold()?,
            settle_delay: settings.settle_delay,
            max_workers: settings.max_workers,
        })
    }

    /// Locks `lock_url`, then checks `check_urls`, and returns those whose
    /// metric reaches the threshold (in `check_urls` order).
    fn lock_and_check(&self, phase: &str, lock_url: &str, check_urls: &[String],
                      log: &mut Option<ObservationLog>) -> Result<Vec<String>> {
        self.oracle.trigger_contention(lock_url);
        thread::sleep(self.settle_delay);

        let results = probe_all(check_urls, self.oracle, self.max_workers)?.by_url();

        let mut above = vec![];
        for url in check_urls {
            let (instance, metric) = match results.get(url) {
                Some(r) => r,
                None => {
                    warn!(phase, lock = lock_url, url = url.as_str(),
                          "mem-check could not be attributed; discarded");
                    continue;
                },
            };
            let accepted = metric.exceeds(self.threshold);
            debug!(phase, lock = lock_url, url = url.as_str(), %metric, accepted, "mem-check");
            record(log, Observation {
                phase: phase.to_string(),
                lock: lock_url.to_string(),
                url: url.clone(),
                instance_id: instance.to_string(),
                value: metric.value(),
                accepted,
            })?;
            if accepted {
                above.push(url.clone());
            }
        }
        Ok(above)
    }

    /// Partitions `instance_urls` into server-sharing groups.
    pub fn identify(&self, instance_urls: &[String], log: &mut Option<ObservationLog>)
            -> Result<Vec<ServerGroup>> {
        let mut remaining = unique_in_order(instance_urls);
        let mut groups = vec![];

        info!(instances = remaining.len(), threshold = self.threshold,
              "starting server coverage identification");

        while let Some(lock_url) = remaining.first().cloned() {
            let check_urls = remaining[1..].to_vec();
            info!(remaining = remaining.len(), lock = lock_url.as_str(), "next iteration");

            if check_urls.is_empty() {
                info!(lock = lock_url.as_str(), "one instance left; singleton group");
                groups.push(ServerGroup::singleton(&lock_url));
                remaining.clear();
                break;
            }

            let candidates = self.lock_and_check("round1", &lock_url, &check_urls, log)?;
            if candidates.is_empty() {
                info!(lock = lock_url.as_str(), "no candidates exceeded threshold");
                groups.push(ServerGroup::singleton(&lock_url));
                remaining.retain(|u| *u != lock_url);
                continue;
            }
            info!(lock = lock_url.as_str(), candidates = ?candidates, "round 1 candidates");

            let verified = self.lock_and_check("round2", &lock_url, &candidates, log)?;
            for url in candidates.iter().filter(|u| !verified.contains(*u)) {
                info!(lock = lock_url.as_str(), url = url.as_str(),
                      "failed reverification; stays ungrouped");
            }

            let mut members = vec![lock_url.clone()];
            members.extend(verified);
            info!(lock = lock_url.as_str(), members = ?members, "committed group");

            remaining.retain(|u| !members.contains(u));
            groups.push(ServerGroup { lock_url, members });
        }

        Ok(groups)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::covers_exactly;
    use crate::error::Error;
    use crate::oracle::mock::MockOracle;

    fn settings(threshold: f64) -> Settings {
        Settings {
            coverage_threshold: Some(threshold),
            settle_delay: Duration::from_millis(0),
            ..Settings::default()
        }
    }

    fn urls(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unset_threshold_is_fatal() {
        let oracle = MockOracle::targeted(&[("a", "wa", "s1")]);
        match CoverageIdentifier::new(&oracle, &Settings::default()) {
            Err(Error::MissingThreshold(_)) => {},
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("should not start without a threshold"),
        }
        assert!(oracle.triggered().is_empty());
    }

    #[test]
    fn reverification_drops_transient_candidates() {
        // Lock A: round 1 reads B=1500, C=200, D=1100; round 2 reads
        // B=1400, D=50. Later iterations fall back to the simulation, in
        // which C and D sit on servers of their own.
        let oracle = MockOracle::targeted(&[("A", "wa", "s1"), ("B", "wb", "s1"),
                                            ("C", "wc", "s2"), ("D", "wd", "s3")])
            .script_checks("B", &["count[0] is 1500", "count[0] is 1400"])
            .script_checks("C", &["count[0] is 200"])
            .script_checks("D", &["count[0] is 1100", "count[0] is 50"]);
        let instances = urls(&["A", "B", "C", "D"]);

        let mut log = Some(ObservationLog::in_memory());
        let identifier = CoverageIdentifier::new(&oracle, &settings(1000.)).unwrap();
        let groups = identifier.identify(&instances, &mut log).unwrap();

        assert_eq!(groups, vec![
            ServerGroup { lock_url: "A".into(), members: urls(&["A", "B"]) },
            ServerGroup::singleton("C"),
            ServerGroup::singleton("D"),
        ]);
        assert!(covers_exactly(&groups, &instances));
        // Two rounds for A, one for C; D is left alone.
        assert_eq!(oracle.triggered(), urls(&["A", "A", "C"]));

        let log = log.unwrap();
        let round2 = log.observations().unwrap().iter()
                        .filter(|o| o.phase == "round2")
                        .map(|o| (o.url.as_str(), o.accepted))
                        .collect::<Vec<_>>();
        assert_eq!(round2, vec![("B", true), ("D", false)]);
    }

    #[test]
    fn groups_follow_servers() {
        let oracle = MockOracle::targeted(&[("u1", "w1", "s1"), ("u2", "w2", "s2"),
                                            ("u3", "w3", "s1"), ("u4", "w4", "s3"),
                                            ("u5", "w5", "s2"), ("u6", "w6", "s1")]);
        let instances = urls(&["u1", "u2", "u3", "u4", "u5", "u6", "u3"]);

        let identifier = CoverageIdentifier::new(&oracle, &settings(1000.)).unwrap();
        let groups = identifier.identify(&instances, &mut None).unwrap();

        assert_eq!(groups, vec![
            ServerGroup { lock_url: "u1".into(), members: urls(&["u1", "u3", "u6"]) },
            ServerGroup { lock_url: "u2".into(), members: urls(&["u2", "u5"]) },
            ServerGroup::singleton("u4"),
        ]);
        assert!(covers_exactly(&groups, &urls(&["u1", "u2", "u3", "u4", "u5", "u6"])));
    }

    #[test]
    fn unattributed_checks_do_not_group() {
        // B shares A's server, but its identity endpoint never answers.
        let oracle = MockOracle::targeted(&[("A", "wa", "s1"), ("B", "wb", "s1"),
                                            ("C", "wc", "s2")])
            .unidentifiable("wb");
        let instances = urls(&["A", "B", "C"]);

        let mut log = Some(ObservationLog::in_memory());
        let identifier = CoverageIdentifier::new(&oracle, &settings(1000.)).unwrap();
        let groups = identifier.identify(&instances, &mut log).unwrap();

        assert_eq!(groups, vec![
            ServerGroup::singleton("A"),
            ServerGroup::singleton("B"),
            ServerGroup::singleton("C"),
        ]);
        let log = log.unwrap();
        assert!(log.observations().unwrap().iter().all(|o| o.url != "B"));
    }

    #[test]
    fn unreachable_instances_end_up_alone() {
        let oracle = MockOracle::targeted(&[("u1", "w1", "s1"), ("u2", "w2", "s1"),
                                            ("u3", "w3", "s1")])
            .unreachable("u2");
        let instances = urls(&["u1", "u2", "u3"]);

        let identifier = CoverageIdentifier::new(&oracle, &settings(1000.)).unwrap();
        let groups = identifier.identify(&instances, &mut None).unwrap();

        assert_eq!(groups, vec![
            ServerGroup { lock_url: "u1".into(), members: urls(&["u1", "u3"]) },
            ServerGroup::singleton("u2"),
        ]);
    }
}
