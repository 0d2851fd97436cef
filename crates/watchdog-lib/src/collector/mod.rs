//! Container runtime access
//!
//! The orchestrator only talks to the [`ContainerRuntime`] trait. The
//! bundled implementation reads the cgroup v2 unified hierarchy and procfs.

mod cgroup_v2;
mod naming;


pub use cgroup_v2::{CgroupRuntime, CgroupVersion, detect_cgroup_version};
pub use naming::display_name;

use crate::error::Result;
use crate::models::{EntityDescriptor, RawStats};

pub use async_trait::async_trait;

/// Source of live entities and their raw stats
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers
    async fn list_live_entities(&self) -> Result<Vec<EntityDescriptor>>;

    /// Fetch raw counters for one container
    ///
    /// Returns `Error::DataUnavailable` when the container vanished or its
    /// counters could not be read.
    async fn fetch_stats(&self, entity_id: &str) -> Result<RawStats>;
}
