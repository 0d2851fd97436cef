//! cgroup v2 runtime
//!
//! Lists running containers from the unified cgroup hierarchy and reads:
//! - cpu.stat for cumulative container CPU time
//! - memory.current, memory.stat and memory.max for the working set and limit
//! - /proc/stat for host CPU time and processor count
//! - /proc/meminfo for the host memory size of unlimited containers

use super::ContainerRuntime;
use crate::error::{Error, Result};
use crate::models::{CpuCounters, EntityDescriptor, MemoryCounters, RawStats};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Clock ticks per second used by /proc/stat
const USER_HZ: u64 = 100;

const NANOS_PER_TICK: u64 = 1_000_000_000 / USER_HZ;

/// Length of the short container id used as a fallback name
const SHORT_ID_LEN: usize = 12;

/// Slices scanned for container cgroups
const CONTAINER_SLICES: &[&str] = &["kubepods.slice", "system.slice", "docker"];

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}

/// Detect which cgroup hierarchy is mounted at `cgroup_root`
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        return CgroupVersion::V2;
    }

    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Container runtime backed by cgroup v2 and procfs
pub struct CgroupRuntime {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    /// Docker data root, used to resolve container names
    docker_root: Option<PathBuf>,
    /// container id -> cgroup directory, filled by listing
    paths: DashMap<String, PathBuf>,
}

impl CgroupRuntime {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: PathBuf::from("/proc"),
            docker_root: None,
            paths: DashMap::new(),
        }
    }

    /// Use a custom proc path (for testing)
    pub fn with_proc_path(mut self, proc_path: impl Into<PathBuf>) -> Self {
        self.proc_path = proc_path.into();
        self
    }

    /// Resolve container names from a Docker data root
    pub fn with_docker_root(mut self, docker_root: impl Into<PathBuf>) -> Self {
        self.docker_root = Some(docker_root.into());
        self
    }

    /// Parse cpu.stat contents, returning `usage_usec`
    pub fn parse_cpu_usage(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("usage_usec"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }

    /// Parse /proc/stat, returning host CPU time and per-processor times in
    /// nanoseconds
    pub fn parse_proc_stat(content: &str) -> Option<(u64, Vec<u64>)> {
        let mut total = None;
        let mut per_cpu = Vec::new();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let Some(label) = parts.next() else {
                continue;
            };
            if !label.starts_with("cpu") {
                continue;
            }

            // user nice system idle iowait irq softirq
            let ticks: u64 = parts.take(7).filter_map(|v| v.parse::<u64>().ok()).sum();
            let nanos = ticks.saturating_mul(NANOS_PER_TICK);

            if label == "cpu" {
                total = Some(nanos);
            } else if label[3..].chars().all(|c| c.is_ascii_digit()) {
                per_cpu.push(nanos);
            }
        }

        total.map(|t| (t, per_cpu))
    }

    /// Parse `MemTotal` from /proc/meminfo, in bytes
    pub fn parse_mem_total(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix("MemTotal:")?;
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kib * 1024)
        })
    }

    /// Parse `inactive_file` from memory.stat, in bytes
    pub fn parse_inactive_file(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("inactive_file"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }

    /// Parse memory.max; `max` means unlimited
    pub fn parse_memory_max(content: &str) -> Option<u64> {
        match content.trim() {
            "max" | "" => None,
            value => value.parse().ok(),
        }
    }

    /// Extract a container id from a cgroup directory name
    ///
    /// Handles the layouts used by common runtimes:
    /// - Docker (systemd driver): docker-<id>.scope
    /// - Docker (cgroupfs driver): <id>
    /// - containerd: cri-containerd-<id>.scope
    /// - CRI-O: crio-<id>.scope
    pub fn extract_container_id(name: &str) -> Option<String> {
        let stripped = name.strip_suffix(".scope").unwrap_or(name);
        let id = ["docker-", "cri-containerd-", "crio-"]
            .iter()
            .find_map(|prefix| stripped.strip_prefix(prefix))
            .unwrap_or(stripped);

        if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(id.to_string())
        } else {
            None
        }
    }

    /// Whether the cgroup still has member processes
    async fn is_running(cgroup_path: &Path) -> bool {
        match fs::read_to_string(cgroup_path.join("cgroup.procs")).await {
            Ok(procs) => !procs.trim().is_empty(),
            // Not every hierarchy exposes cgroup.procs; presence of cpu.stat is enough
            Err(_) => true,
        }
    }

    /// Walk a cgroup subtree looking for running containers
    async fn scan_cgroup_dir(root: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut containers = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == root => {
                    return Err(Error::Runtime(format!(
                        "failed to read {}: {}",
                        root.display(),
                        e
                    )))
                }
                // Subtrees disappear as containers stop
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                if !entry_path.is_dir() {
                    continue;
                }

                let name = entry.file_name().to_string_lossy().to_string();
                match Self::extract_container_id(&name) {
                    Some(container_id) => {
                        if entry_path.join("cpu.stat").exists()
                            && Self::is_running(&entry_path).await
                        {
                            containers.push((container_id, entry_path));
                        }
                    }
                    None => pending.push(entry_path),
                }
            }
        }

        Ok(containers)
    }

    /// Name candidates for a container, most specific first
    async fn name_candidates(&self, container_id: &str) -> Vec<String> {
        let mut candidates = Vec::new();

        if let Some(docker_root) = &self.docker_root {
            let config_path = docker_root
                .join("containers")
                .join(container_id)
                .join("config.v2.json");
            if let Ok(content) = fs::read_to_string(&config_path).await {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(name) = config.get("Name").and_then(|n| n.as_str()) {
                        candidates.push(name.to_string());
                    }
                }
            }
        }

        candidates.push(container_id[..SHORT_ID_LEN.min(container_id.len())].to_string());
        candidates
    }

    fn cgroup_path(&self, container_id: &str) -> PathBuf {
        self.paths
            .get(container_id)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| self.cgroup_root.join(container_id))
    }

    /// Number of container cgroup paths currently cached
    pub fn tracked_paths(&self) -> usize {
        self.paths.len()
    }

    async fn read_file(&self, entity_id: &str, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .map_err(|e| Error::data_unavailable(entity_id, format!("{}: {}", path.display(), e)))
    }

    async fn host_cpu(&self, entity_id: &str) -> Result<(u64, Vec<u64>)> {
        let content = self.read_file(entity_id, &self.proc_path.join("stat")).await?;
        Self::parse_proc_stat(&content)
            .ok_or_else(|| Error::data_unavailable(entity_id, "no cpu line in /proc/stat"))
    }

    async fn host_memory(&self) -> Option<u64> {
        let content = fs::read_to_string(self.proc_path.join("meminfo")).await.ok()?;
        Self::parse_mem_total(&content)
    }
}

#[async_trait]
impl ContainerRuntime for CgroupRuntime {
    async fn list_live_entities(&self) -> Result<Vec<EntityDescriptor>> {
        let mut found = Vec::new();

        for slice in CONTAINER_SLICES {
            let slice_path = self.cgroup_root.join(slice);
            if slice_path.exists() {
                found.extend(Self::scan_cgroup_dir(&slice_path).await?);
            }
        }

        // Forget cgroups of containers that are gone
        let listed: HashSet<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
        self.paths.retain(|id, _| listed.contains(id.as_str()));

        let mut descriptors = Vec::with_capacity(found.len());
        for (container_id, path) in found {
            self.paths.insert(container_id.clone(), path);
            let name_candidates = self.name_candidates(&container_id).await;
            descriptors.push(EntityDescriptor {
                id: container_id,
                name_candidates,
            });
        }

        debug!(count = descriptors.len(), "Listed running containers");
        Ok(descriptors)
    }

    async fn fetch_stats(&self, entity_id: &str) -> Result<RawStats> {
        let cgroup_path = self.cgroup_path(entity_id);
        if !cgroup_path.exists() {
            return Err(Error::data_unavailable(entity_id, "cgroup no longer exists"));
        }

        let cpu_stat = self.read_file(entity_id, &cgroup_path.join("cpu.stat")).await?;
        let usage_usec = Self::parse_cpu_usage(&cpu_stat)
            .ok_or_else(|| Error::data_unavailable(entity_id, "usage_usec missing from cpu.stat"))?;
        let (total_time, per_cpu) = self.host_cpu(entity_id).await?;

        let memory_current = self
            .read_file(entity_id, &cgroup_path.join("memory.current"))
            .await?;
        let current: u64 = memory_current.trim().parse().map_err(|_| {
            Error::data_unavailable(entity_id, "memory.current is not a number")
        })?;

        // Working set = current - inactive_file
        let inactive_file = fs::read_to_string(cgroup_path.join("memory.stat"))
            .await
            .ok()
            .and_then(|content| Self::parse_inactive_file(&content))
            .unwrap_or(0);
        let usage = current.saturating_sub(inactive_file);

        let limit = match fs::read_to_string(cgroup_path.join("memory.max")).await {
            Ok(content) => match Self::parse_memory_max(&content) {
                Some(limit) => Some(limit),
                None => self.host_memory().await,
            },
            Err(_) => self.host_memory().await,
        };

        Ok(RawStats {
            cpu: CpuCounters {
                busy_time: usage_usec.saturating_mul(1_000),
                total_time,
                per_cpu: (!per_cpu.is_empty()).then_some(per_cpu),
            },
            memory: MemoryCounters { usage, limit },
        })
    }
}
