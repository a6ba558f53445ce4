//! Architecture sets: instances grouped by declared CPU brand and
//! frequency, reduced to one representative per physical server.
//!
//! A victim can only share a server with instances of its own
//! architecture, and probing several instances of the same server adds
//! nothing, so the reduced sets are what the localizer searches.
use std::collections::{HashMap, HashSet};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::fan_out;
use crate::coverage::ServerGroup;
use crate::error::Result;
use crate::oracle::{ContentionOracle, CpuInfo};

/// Brand used for every instance whose architecture is indeterminate.
pub const UNKNOWN_BRAND: &str = "unknown";

/// `(cpu_brand, parsed_freq)`; equal iff both fields are equal, a missing
/// frequency included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchitectureKey {
    pub cpu_brand: String,
    pub parsed_freq: Option<OrderedFloat<f64>>,
}

impl ArchitectureKey {
    pub fn unknown() -> ArchitectureKey {
        ArchitectureKey { cpu_brand: UNKNOWN_BRAND.to_string(), parsed_freq: None }
    }

    /// A missing brand collapses to the unknown key, whatever the frequency.
    pub fn from_info(info: Option<CpuInfo>) -> ArchitectureKey {
        match info {
            Some(CpuInfo { cpu_brand: Some(brand), parsed_freq }) => ArchitectureKey {
                cpu_brand: brand,
                parsed_freq: parsed_freq.map(OrderedFloat::from),
            },
            _ => ArchitectureKey::unknown(),
        }
    }
}

/// The instances of one architecture, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureSet {
    pub key: ArchitectureKey,
    pub instances: Vec<String>,
}

/// One entry of the `cpu_sets` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSet {
    pub cpu_brand: Option<String>,
    pub parsed_freq: Option<f64>,
    #[serde(default)]
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSets {
    pub cpu_sets: Vec<CpuSet>,
}

/// Queries `/info` on every URL concurrently and groups the URLs by
/// architecture. Sets appear in order of first appearance.
pub fn group_by_architecture<O>(urls: &[String], oracle: &O) -> Result<Vec<ArchitectureSet>>
where O: ContentionOracle {
    // One worker per URL.
    let keys = fan_out(urls, urls.len(), |url| {
        let key = ArchitectureKey::from_info(oracle.cpu_info(url));
        info!(url = url.as_str(), cpu_brand = key.cpu_brand.as_str(),
              parsed_freq = ?key.parsed_freq.map(|f| f.into_inner()), "cpu info");
        key
    })?;

    let mut sets: Vec<ArchitectureSet> = vec![];
    let mut index: HashMap<ArchitectureKey, usize> = HashMap::new();
    for (url, key) in urls.iter().zip(keys) {
        let i = *index.entry(key.clone()).or_insert_with(|| {
            sets.push(ArchitectureSet { key, instances: vec![] });
            sets.len() - 1
        });
        sets[i].instances.push(url.clone());
    }

    for set in &sets {
        info!(cpu_brand = set.key.cpu_brand.as_str(),
              parsed_freq = ?set.key.parsed_freq.map(|f| f.into_inner()),
              instances = set.instances.len(), "architecture set");
    }
    Ok(sets)
}

/// Maps each URL to the index of its server group; the last group wins
/// if a URL appears in several.
fn group_index(groups: &[ServerGroup]) -> HashMap<&str, usize> {
    let mut index = HashMap::new();
    for (gid, group) in groups.iter().enumerate() {
        for url in &group.members {
            index.insert(url.as_str(), gid);
        }
    }
    index
}

#[derive(PartialEq, Eq, Hash)]
enum Owner<'a> {
    Group(usize),
    Single(&'a str),
}

/// Keeps one representative per server group within each architecture
/// set: the first member met in input order. URLs in no group count as
/// groups of their own. Representatives are listed sorted.
pub fn deduplicate_by_server(sets: &[ArchitectureSet], groups: &[ServerGroup]) -> Vec<CpuSet> {
    let index = group_index(groups);

    sets.iter().map(|set| {
        let mut seen = HashSet::new();
        let mut reps = set.instances.iter()
                          .filter(|url| {
                              let owner = match index.get(url.as_str()) {
                                  Some(gid) => Owner::Group(*gid),
                                  None => Owner::Single(url.as_str()),
                              };
                              seen.insert(owner)
                          })
                          .cloned()
                          .collect::<Vec<_>>();
        reps.sort();

        info!(cpu_brand = set.key.cpu_brand.as_str(), instances = set.instances.len(),
              representatives = reps.len(), "deduplicated by server");

        CpuSet {
            cpu_brand: Some(set.key.cpu_brand.clone()),
            parsed_freq: set.key.parsed_freq.map(|f| f.into_inner()),
            instances: reps,
        }
    }).collect()
}
