//! Game entity recovery from console memory captures
//!
//! A capture holds fragments of TES4-family plugin records next to the live
//! object graph the game built from them. Recovery runs in phases:
//!
//! 1. map the capture into address regions ([`region`], [`dump`])
//! 2. scan for records and walk their subrecords ([`esmdump_format`])
//! 3. index names and follow runtime pointers ([`names`], [`runtime`])
//! 4. merge duplicates and build domain entities ([`reconstruct`])
//!
//! [`pipeline::recover`] runs all of them; [`diagnostics::Diagnostics`]
//! reports what was skipped or degraded along the way.
//!
//! # Example
//!
//! ```no_run
//! use esmdump::{DumpFile, RecoveryConfig};
//!
//! let config = RecoveryConfig::default();
//! let dump = DumpFile::open("capture.dmp", config.base_address, None)?;
//! let recovery = esmdump::recover_dump(&dump, &config)?;
//! for npc in recovery.entities.npcs() {
//!     println!("{} {:?}", npc.info.form_id, npc.info.editor_id);
//! }
//! # Ok::<(), esmdump::Error>(())
//! ```

pub mod config;
pub mod diagnostics;
pub mod dump;
pub mod names;
pub mod pipeline;
pub mod reconstruct;
pub mod region;
pub mod runtime;

use std::path::PathBuf;

pub use config::RecoveryConfig;
pub use diagnostics::{Diagnostics, DuplicateFormId, UnsupportedRecordType};
pub use dump::DumpFile;
pub use names::{NameIndexBuilder, Resolver};
pub use pipeline::{recover, recover_buffer, recover_dump, scan_regions, Recovery};
pub use reconstruct::{BuilderRegistry, Entity, Family, Reconstruction, RecordInfo};
pub use region::{MemoryRegion, RegionError, RegionMap};
pub use runtime::{PointerResolver, RuntimeFindings, RuntimeHints, RuntimeLayout, UnresolvedPointer};

/// Errors from opening captures and loading configuration
///
/// Nothing found inside a capture is an error; decoding problems are
/// collected in [`Diagnostics`] instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid region layout: {0}")]
    Region(#[from] RegionError),

    #[error("Format error: {0}")]
    Format(#[from] esmdump_format::Error),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
