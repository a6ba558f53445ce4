//! An in-process platform simulation used by the tests.
//!
//! Base URLs route to one or more workers, workers live on servers, and a
//! `/check` handled by a worker reads high while another worker on the
//! same server holds the lock. An identity probe reports the worker that
//! handled the preceding `/lock` or `/check` issued from the same thread,
//! or is routed on its own when there is none.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::oracle::{ContentionOracle, CpuInfo};

thread_local! {
    static LAST_WORKER: RefCell<Option<String>> = RefCell::new(None);
}

pub(crate) const HIGH: u64 = 5000;
pub(crate) const LOW: u64 = 100;

#[derive(Default)]
pub(crate) struct MockOracle {
    routes: HashMap<String, Vec<String>>,
    next_route: Mutex<HashMap<String, usize>>,
    servers: HashMap<String, String>,
    locked: Mutex<Option<String>>,
    lock_routes: Mutex<VecDeque<String>>,
    check_script: Mutex<HashMap<String, VecDeque<String>>>,
    unidentifiable: HashSet<String>,
    unreachable: HashSet<String>,
    cpu: HashMap<String, CpuInfo>,
    latencies: Mutex<VecDeque<Option<f64>>>,
    pub triggered: Mutex<Vec<String>>,
    pub checks: Mutex<Vec<String>>,
}

impl MockOracle {
    /// One worker per URL: `(url, worker, server)`.
    pub fn targeted(instances: &[(&str, &str, &str)]) -> MockOracle {
        let mut oracle = MockOracle::default();
        for (url, worker, server) in instances {
            oracle.routes.insert(url.to_string(), vec![worker.to_string()]);
            oracle.servers.insert(worker.to_string(), server.to_string());
        }
        oracle
    }

    /// All `(worker, server)` pairs behind one URL, routed round-robin.
    pub fn shared(url: &str, workers: &[(&str, &str)]) -> MockOracle {
        let mut oracle = MockOracle::default();
        oracle.routes.insert(url.to_string(),
                             workers.iter().map(|(w, _)| w.to_string()).collect());
        for (worker, server) in workers {
            oracle.servers.insert(worker.to_string(), server.to_string());
        }
        oracle
    }

    /// Scripted `/check` bodies for `url`, consumed before simulating.
    pub fn script_checks(self, url: &str, bodies: &[&str]) -> MockOracle {
        self.check_script.lock().unwrap()
            .insert(url.to_string(), bodies.iter().map(|b| b.to_string()).collect());
        self
    }

    /// Forces the workers that handle the next `/lock` requests.
    pub fn script_locks(self, workers: &[&str]) -> MockOracle {
        self.lock_routes.lock().unwrap()
            .extend(workers.iter().map(|w| w.to_string()));
        self
    }

    pub fn unidentifiable(mut self, worker: &str) -> MockOracle {
        self.unidentifiable.insert(worker.to_string());
        self
    }

    pub fn unreachable(mut self, url: &str) -> MockOracle {
        self.unreachable.insert(url.to_string());
        self
    }

    pub fn with_cpu(mut self, url: &str, brand: Option<&str>, freq: Option<f64>) -> MockOracle {
        self.cpu.insert(url.to_string(), CpuInfo {
            cpu_brand: brand.map(String::from),
            parsed_freq: freq,
        });
        self
    }

    /// Victim latencies in seconds; `None` is a failed request.
    pub fn with_latencies(self, latencies: &[Option<f64>]) -> MockOracle {
        self.latencies.lock().unwrap().extend(latencies.iter().cloned());
        self
    }

    pub fn triggered(&self) -> Vec<String> {
        self.triggered.lock().unwrap().clone()
    }

    fn route(&self, url: &str) -> Result<String> {
        if self.unreachable.contains(url) {
            return Err(Error::Request { url: url.to_string(), reason: "refused".into() });
        }
        let workers = self.routes.get(url).ok_or_else(|| Error::Status {
            url: url.to_string(),
            status: 404,
        })?;
        let mut next = self.next_route.lock().unwrap();
        let i = next.entry(url.to_string()).or_insert(0);
        let worker = workers[*i % workers.len()].clone();
        *i += 1;
        LAST_WORKER.with(|w| *w.borrow_mut() = Some(worker.clone()));
        Ok(worker)
    }
}

impl ContentionOracle for MockOracle {
    fn lock(&self, base_url: &str) -> Result<()> {
        self.triggered.lock().unwrap().push(base_url.to_string());
        let forced = self.lock_routes.lock().unwrap().pop_front();
        let worker = match forced {
            Some(worker) => {
                LAST_WORKER.with(|w| *w.borrow_mut() = Some(worker.clone()));
                worker
            },
            None => self.route(base_url)?,
        };
        *self.locked.lock().unwrap() = Some(worker);
        Ok(())
    }

    fn check(&self, base_url: &str) -> Result<String> {
        self.checks.lock().unwrap().push(base_url.to_string());
        let worker = self.route(base_url)?;
        let scripted = self.check_script.lock().unwrap()
                           .get_mut(base_url)
                           .and_then(|bodies| bodies.pop_front());
        if let Some(body) = scripted {
            return Ok(body);
        }

        let locked = self.locked.lock().unwrap().clone();
        let contended = match locked {
            Some(ref l) if *l != worker => self.servers.get(l) == self.servers.get(&worker),
            _ => false,
        };
        Ok(format!("count[0] is {}", if contended { HIGH } else { LOW }))
    }

    fn instance_id(&self, base_url: &str) -> Result<String> {
        let worker = match LAST_WORKER.with(|w| w.borrow_mut().take()) {
            Some(worker) => worker,
            None => {
                let worker = self.route(base_url)?;
                LAST_WORKER.with(|w| w.borrow_mut().take());
                worker
            },
        };
        if self.unidentifiable.contains(&worker) {
            return Err(Error::Status { url: base_url.to_string(), status: 503 });
        }
        Ok(worker)
    }

    fn info(&self, base_url: &str) -> Result<CpuInfo> {
        self.cpu.get(base_url).cloned().ok_or_else(|| Error::Status {
            url: base_url.to_string(),
            status: 500,
        })
    }

    fn time_request(&self, url: &str) -> Result<Duration> {
        match self.latencies.lock().unwrap().pop_front() {
            Some(Some(secs)) => Ok(Duration::from_secs_f64(secs)),
            Some(None) => Err(Error::Request { url: url.to_string(), reason: "timeout".into() }),
            None => Ok(Duration::from_millis(10)),
        }
    }
}
