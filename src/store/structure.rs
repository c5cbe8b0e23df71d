//! Record structures: how a store partitions its facts.

use crate::fact::{Fact, FactKind};

/// Partition holding facts whose payload kind this build does not know.
pub const UNKNOWN_PARTITION: &str = "unknown";

/// Describes the partition layout of a store.
///
/// The name and version are persisted in the store's metadata; opening a
/// store with a structure that reports a different name or version is a
/// conflict.
pub trait RecordStructure: Send + Sync {
    /// Stable identifier written to `pail.meta`.
    fn name(&self) -> &str;

    fn format_version(&self) -> u32;

    /// Partition directory a fact is written to.
    fn partition(&self, fact: &Fact) -> String;

    /// Whether a directory under the store root is one of this structure's partitions.
    fn is_partition(&self, name: &str) -> bool;
}

/// Partitions facts by payload kind, one directory per union tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactStructure;

impl RecordStructure for FactStructure {
    fn name(&self) -> &str {
        "fact-by-kind"
    }

    fn format_version(&self) -> u32 {
        1
    }

    fn partition(&self, fact: &Fact) -> String {
        fact.kind()
            .map(|k| k.partition_name().to_string())
            .unwrap_or_else(|| UNKNOWN_PARTITION.to_string())
    }

    fn is_partition(&self, name: &str) -> bool {
        name == UNKNOWN_PARTITION || FactKind::from_partition_name(name).is_some()
    }
}
