//! Utility routines for loading and storing data into files.
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::architecture::{CpuSet, CpuSets};
use crate::coverage::ServerGroup;
use crate::error::Result;

/// Loads one URL (or instance id) per line, skipping blank lines and
/// `#` comments.
pub fn load_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = vec![];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        lines.push(line.to_string());
    }
    Ok(lines)
}

fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Loads server groups as a JSON list of `{lock_url, members}`.
pub fn load_server_groups<P: AsRef<Path>>(path: P) -> Result<Vec<ServerGroup>> {
    load_json(path)
}

pub fn save_server_groups<P: AsRef<Path>>(groups: &[ServerGroup], path: P) -> Result<()> {
    save_json(&groups, path)
}

/// Loads cpu sets from `{"cpu_sets": [...]}`.
pub fn load_cpu_sets<P: AsRef<Path>>(path: P) -> Result<Vec<CpuSet>> {
    let sets: CpuSets = load_json(path)?;
    Ok(sets.cpu_sets)
}

pub fn save_cpu_sets<P: AsRef<Path>>(cpu_sets: &[CpuSet], path: P) -> Result<()> {
    save_json(&CpuSets { cpu_sets: cpu_sets.to_vec() }, path)
}

/// Loads instance ids from a JSON list of strings.
pub fn load_instance_ids<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    load_json(path)
}

pub fn save_instance_ids<P: AsRef<Path>>(ids: &[String], path: P) -> Result<()> {
    save_json(&ids, path)
}
