//! # notepress-core
//!
//! Publish state machine for moving vault notes into a Hugo content tree.
//!
//! This crate parses note headers, rewrites embedded image references into the
//! site's asset layout, emits page bundles, and keeps a ledger of what was
//! emitted so notes can be unpublished and republished.

pub mod atomic;
pub mod body;
pub mod config;
pub mod header;
pub mod processor;
pub mod resources;
pub mod slug;
pub mod tags;
pub mod tracker;

pub use config::{Config, ConfigError};
pub use header::{HeaderError, HeaderRecord, NoteDate};
pub use processor::{
    sort_candidates, AttachedImage, BatchResult, Candidate, CandidateOrder, EmittedNote,
    FailedNote, NoteError, PublishError, PublishOptions, Publisher, RemovedNote, SkipReason,
    SkippedNote, UnpublishOptions,
};
pub use resources::{AssetTarget, ResourceError, Rewrite, UnresolvedResource};
pub use slug::slugify;
pub use tags::{TagCategoryMap, TagMapError};
pub use tracker::{AssetRecord, PublishRecord, PublishTracker, TrackerError};
