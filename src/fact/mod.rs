//! Fact schema and record framing.
//!
//! Facts are protobuf messages. The payload is a `oneof` over event kinds,
//! so readers built against an older schema decode unknown kinds as
//! `DataUnit { kind: None }` instead of failing, and unknown trailing fields
//! are skipped by the decoder.
//!
//! ```text
//! Fact
//! ├── pedigree: Pedigree { true_as_of_secs }
//! └── dataunit: DataUnit
//!     └── kind (oneof)
//!         └── 1: PageViewEdge { person, page, nonce }
//! ```

mod codec;

pub use codec::{decode_record, encode_record, RecordIter, FRAME_HEADER_LEN, MAX_RECORD_LEN};

use std::sync::atomic::{AtomicI64, Ordering};

/// Errors decoding a single framed record.
///
/// A decode error affects one record only; readers skip and count it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("Truncated record: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Record length {0} exceeds maximum")]
    Oversized(usize),
}

/// Errors encoding a fact into a framed record.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Record of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

// ============================================================================
// Schema
// ============================================================================

/// An immutable, timestamped event record.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Fact {
    #[prost(message, optional, tag = "1")]
    pub pedigree: Option<Pedigree>,
    #[prost(message, optional, tag = "2")]
    pub dataunit: Option<DataUnit>,
}

/// When the fact became true.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Pedigree {
    #[prost(int64, tag = "1")]
    pub true_as_of_secs: i64,
}

/// Tagged union over event kinds.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DataUnit {
    #[prost(oneof = "data_unit::Kind", tags = "1")]
    pub kind: Option<data_unit::Kind>,
}

pub mod data_unit {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        PageView(super::PageViewEdge),
    }
}

/// A user viewed a page.
///
/// `nonce` keeps otherwise identical views (same user, url and second)
/// distinct under content addressing. It carries no ordering meaning.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PageViewEdge {
    #[prost(message, optional, tag = "1")]
    pub person: Option<UserId>,
    #[prost(message, optional, tag = "2")]
    pub page: Option<PageId>,
    #[prost(int64, tag = "3")]
    pub nonce: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserId {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PageId {
    #[prost(string, tag = "1")]
    pub url: String,
}

// ============================================================================
// Kinds
// ============================================================================

/// Rust-side tag of the payload union. Each kind owns one store partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactKind {
    PageView,
}

impl FactKind {
    pub const ALL: [FactKind; 1] = [FactKind::PageView];

    /// Directory name of this kind's partition.
    pub fn partition_name(self) -> &'static str {
        match self {
            FactKind::PageView => "page_view",
        }
    }

    pub fn from_partition_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.partition_name() == name)
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.partition_name())
    }
}

impl Fact {
    /// Build a page view fact.
    pub fn page_view(
        user_id: impl Into<String>,
        url: impl Into<String>,
        true_as_of_secs: i64,
        nonce: i64,
    ) -> Self {
        Fact {
            pedigree: Some(Pedigree { true_as_of_secs }),
            dataunit: Some(DataUnit {
                kind: Some(data_unit::Kind::PageView(PageViewEdge {
                    person: Some(UserId {
                        user_id: user_id.into(),
                    }),
                    page: Some(PageId { url: url.into() }),
                    nonce,
                })),
            }),
        }
    }

    /// Payload kind, or `None` when the tag is unknown to this build.
    pub fn kind(&self) -> Option<FactKind> {
        match self.dataunit.as_ref()?.kind.as_ref()? {
            data_unit::Kind::PageView(_) => Some(FactKind::PageView),
        }
    }

    pub fn true_as_of(&self) -> Option<i64> {
        self.pedigree.as_ref().map(|p| p.true_as_of_secs)
    }

    pub fn page_view_edge(&self) -> Option<&PageViewEdge> {
        match self.dataunit.as_ref()?.kind.as_ref()? {
            data_unit::Kind::PageView(edge) => Some(edge),
        }
    }

    pub fn page_url(&self) -> Option<&str> {
        self.page_view_edge()?.page.as_ref().map(|p| p.url.as_str())
    }

    /// Copy of this fact with the page URL replaced. Non-pageview facts are
    /// returned unchanged.
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        if let Some(DataUnit {
            kind: Some(data_unit::Kind::PageView(edge)),
        }) = self.dataunit.as_mut()
        {
            edge.page = Some(PageId { url: url.into() });
        }
        self
    }
}

// ============================================================================
// Nonces
// ============================================================================

/// Monotonic nonce source for producers.
#[derive(Debug, Default)]
pub struct NonceSequence {
    next: AtomicI64,
}

impl NonceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests;
