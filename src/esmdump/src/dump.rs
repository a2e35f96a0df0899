//! Memory-mapped capture files
//!
//! Layout detection, in order:
//! - Windows minidump, detected by its `MDMP` signature
//! - a `.maps` sidecar next to the capture
//! - otherwise the whole file as one region at the configured base address

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use esmdump_format::ByteOrder;
use memmap2::Mmap;

use crate::region::{fit_to_buffer, is_minidump, parse_maps, parse_minidump, RegionMap};
use crate::{Error, Result};

/// A capture file mapped read-only, with its region layout
pub struct DumpFile {
    mmap: Mmap,
    regions: RegionMap,
    pub path: PathBuf,
}

impl DumpFile {
    /// Open a capture, detecting its layout
    ///
    /// `base_address` and `hint` apply only when the capture carries no
    /// layout metadata.
    pub fn open<P: AsRef<Path>>(path: P, base_address: u64, hint: Option<ByteOrder>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mmap = map_file(&path)?;

        tracing::info!("Opened capture {:?} ({} MB)", path, mmap.len() / 1_000_000);

        let regions = if is_minidump(&mmap) {
            tracing::info!("Detected minidump layout");
            let regions = parse_minidump(&mmap)?;
            let regions = regions
                .into_iter()
                .map(|r| match hint {
                    Some(order) => r.with_hint(order),
                    None => r,
                })
                .collect();
            RegionMap::with_buffer_len(fit_to_buffer(regions, mmap.len()), mmap.len())?
        } else {
            let maps_path = path.with_extension("maps");
            if maps_path.exists() {
                let text = read_text(&maps_path)?;
                let regions = fit_to_buffer(parse_maps(&text, hint), mmap.len());
                if regions.is_empty() {
                    tracing::warn!(
                        "Layout file {:?} lists no readable regions, using one region at {:#x}",
                        maps_path,
                        base_address
                    );
                    RegionMap::single(mmap.len(), base_address, hint)
                } else {
                    RegionMap::with_buffer_len(regions, mmap.len())?
                }
            } else {
                tracing::debug!("No layout metadata, using one region at {:#x}", base_address);
                RegionMap::single(mmap.len(), base_address, hint)
            }
        };

        tracing::info!("Capture has {} regions", regions.len());
        Ok(Self {
            mmap,
            regions,
            path,
        })
    }

    /// Open a capture with an explicit layout sidecar
    pub fn open_with_maps<P: AsRef<Path>>(
        dump_path: P,
        maps_path: P,
        hint: Option<ByteOrder>,
    ) -> Result<Self> {
        let path = dump_path.as_ref().to_path_buf();
        let mmap = map_file(&path)?;
        let text = read_text(maps_path.as_ref())?;
        let regions = fit_to_buffer(parse_maps(&text, hint), mmap.len());
        let regions = RegionMap::with_buffer_len(regions, mmap.len())?;

        tracing::info!(
            "Opened capture {:?} ({} MB) with {} regions",
            path,
            mmap.len() / 1_000_000,
            regions.len()
        );

        Ok(Self {
            mmap,
            regions,
            path,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    // The capture is opened read-only and never written while mapped
    unsafe { Mmap::map(&file) }.map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}
