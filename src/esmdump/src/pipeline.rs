//! End-to-end recovery over one capture

use std::ops::Range;

use esmdump_format::{decode_records, scan_ranges, ByteOrder, RawRecord, ScanOptions, SchemaTable};

use crate::config::RecoveryConfig;
use crate::diagnostics::Diagnostics;
use crate::dump::DumpFile;
use crate::names::{NameIndexBuilder, Resolver};
use crate::reconstruct::{reconstruct, BuilderRegistry, Reconstruction};
use crate::region::RegionMap;
use crate::runtime::{collect, PointerResolver, RuntimeFindings};
use crate::Result;

/// Everything recovered from a capture
#[derive(Debug, Clone)]
pub struct Recovery {
    pub entities: Reconstruction,
    /// Name and cross-reference lookups for the entities' FormIds
    pub resolver: Resolver,
    pub diagnostics: Diagnostics,
    pub runtime: RuntimeFindings,
}

/// Scan every region of the capture in parallel
///
/// A region's endianness hint, else `options.preferred_order`, breaks ties
/// between equally plausible byte orders. Offsets in the result index
/// `buffer` and are sorted ascending.
pub fn scan_regions(buffer: &[u8], regions: &RegionMap, options: &ScanOptions) -> Vec<RawRecord> {
    if regions.is_empty() {
        return scan_ranges(buffer, &[0..buffer.len()], options);
    }

    let mut groups: Vec<(Option<ByteOrder>, Vec<Range<usize>>)> = Vec::new();
    for region in regions.regions() {
        let order = region.endianness_hint.or(options.preferred_order);
        match groups.iter_mut().find(|(o, _)| *o == order) {
            Some((_, ranges)) => ranges.push(region.file_range()),
            None => groups.push((order, vec![region.file_range()])),
        }
    }

    let mut records: Vec<RawRecord> = groups
        .into_iter()
        .flat_map(|(order, ranges)| {
            let options = ScanOptions {
                preferred_order: order,
                ..options.clone()
            };
            scan_ranges(buffer, &ranges, &options)
        })
        .collect();

    records.sort_by_key(|r| r.offset);
    records.dedup_by_key(|r| r.offset);
    records
}

/// Run every phase on the current rayon pool
pub fn recover(
    buffer: &[u8],
    regions: &RegionMap,
    schema: &SchemaTable,
    config: &RecoveryConfig,
) -> Recovery {
    let mut diagnostics = Diagnostics::new();
    diagnostics.regions = regions.len();

    let options = ScanOptions {
        preferred_order: config.scan.preferred_order.or(config.default_byte_order),
        ..config.scan.clone()
    };
    let raw = scan_regions(buffer, regions, &options);
    diagnostics.add_scanned(&raw);
    tracing::info!(
        "Scanned {} regions: {} records ({} ambiguous)",
        regions.len(),
        raw.len(),
        diagnostics.ambiguous_records
    );

    let decoded = decode_records(buffer, &raw, schema);
    diagnostics.add_decoded(&decoded);
    tracing::info!(
        "Decoded {} records: {} partial, {} structural errors",
        decoded.len(),
        diagnostics.partial_records,
        diagnostics.structural_error_count()
    );

    // Offset order, so equally complete copies resolve like merge_duplicates
    let mut names = NameIndexBuilder::new();
    for record in &decoded {
        names.add_record(record);
    }

    let runtime = if config.hints.is_empty() {
        tracing::debug!("No runtime hints, skipping pointer walks");
        RuntimeFindings::default()
    } else {
        let pointers = PointerResolver::new(buffer, regions, &config.runtime);
        collect(&pointers, &config.hints, names.signatures())
    };
    names.add_runtime(&runtime);
    diagnostics.unresolved_pointers = runtime.unresolved;

    let resolver = names.freeze();
    let (entities, report) = reconstruct(&decoded, &resolver, &BuilderRegistry::builtin());
    diagnostics.add_reconstruction(&entities, &report);

    tracing::info!("Recovery: {}", diagnostics.summary());
    Recovery {
        entities,
        resolver,
        diagnostics,
        runtime,
    }
}

/// Recover with the schema and threading named by the config
pub fn recover_buffer(buffer: &[u8], regions: &RegionMap, config: &RecoveryConfig) -> Result<Recovery> {
    let schema = config.schema()?;
    if config.parallel {
        return Ok(recover(buffer, regions, &schema, config));
    }
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build()?;
    Ok(pool.install(|| recover(buffer, regions, &schema, config)))
}

pub fn recover_dump(dump: &DumpFile, config: &RecoveryConfig) -> Result<Recovery> {
    recover_buffer(dump.data(), dump.regions(), config)
}
