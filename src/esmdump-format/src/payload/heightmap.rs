//! Landscape height data (`LAND`/`VHGT`)
//!
//! The payload is a base offset followed by a 33x33 grid of signed deltas.
//! The first delta of each row is relative to the first height of the row
//! above; every other delta is relative to its left neighbour.

use serde::Serialize;

use crate::endian::{read_bytes, read_f32, ByteOrder, DecodeError};

/// Vertices per grid side
pub const GRID_SIZE: usize = 33;

/// Game units per stored height step
pub const HEIGHT_SCALE: f32 = 8.0;

/// Minimum `VHGT` payload: offset plus deltas (three trailing pad bytes are optional)
pub const VHGT_MIN_SIZE: usize = 4 + GRID_SIZE * GRID_SIZE;

/// Accumulated landscape heights, in stored units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeightGrid {
    pub offset: f32,
    /// Row-major, `GRID_SIZE * GRID_SIZE` entries
    pub heights: Vec<f32>,
}

impl HeightGrid {
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= GRID_SIZE || col >= GRID_SIZE {
            return None;
        }
        self.heights.get(row * GRID_SIZE + col).copied()
    }

    /// Heights in game units
    pub fn scaled(&self) -> Vec<f32> {
        self.heights.iter().map(|h| h * HEIGHT_SCALE).collect()
    }

    pub fn min(&self) -> f32 {
        self.heights.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.heights.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Decode a `VHGT` payload
pub fn decode_vhgt(payload: &[u8], order: ByteOrder) -> Result<HeightGrid, DecodeError> {
    let offset = read_f32(payload, 0, order)?;
    let deltas = read_bytes(payload, 4, GRID_SIZE * GRID_SIZE)?;

    let mut heights = Vec::with_capacity(GRID_SIZE * GRID_SIZE);
    let mut row_start = offset;
    for row in 0..GRID_SIZE {
        let base = row * GRID_SIZE;
        row_start += deltas[base] as i8 as f32;
        let mut height = row_start;
        heights.push(height);
        for col in 1..GRID_SIZE {
            height += deltas[base + col] as i8 as f32;
            heights.push(height);
        }
    }

    Ok(HeightGrid { offset, heights })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(offset: f32, order: ByteOrder, delta: impl Fn(usize, usize) -> i8) -> Vec<u8> {
        let mut out = match order {
            ByteOrder::Little => offset.to_le_bytes().to_vec(),
            ByteOrder::Big => offset.to_be_bytes().to_vec(),
        };
        for row in 0..GRID_SIZE {
            for col in 0..GRID_SIZE {
                out.push(delta(row, col) as u8);
            }
        }
        out.extend_from_slice(&[0, 0, 0]);
        out
    }

    #[test]
    fn test_flat_grid() {
        let grid = decode_vhgt(&payload(10.0, ByteOrder::Big, |_, _| 0), ByteOrder::Big).unwrap();
        assert_eq!(grid.heights.len(), GRID_SIZE * GRID_SIZE);
        assert!(grid.heights.iter().all(|&h| h == 10.0));
        assert_eq!(grid.scaled()[0], 80.0);
    }

    #[test]
    fn test_row_starts_accumulate_down() {
        // Each row starts one higher than the last; columns rise by two
        let data = payload(0.0, ByteOrder::Little, |_, col| if col == 0 { 1 } else { 2 });
        let grid = decode_vhgt(&data, ByteOrder::Little).unwrap();
        assert_eq!(grid.get(0, 0), Some(1.0));
        assert_eq!(grid.get(0, 1), Some(3.0));
        assert_eq!(grid.get(1, 0), Some(2.0));
        assert_eq!(grid.get(2, 32), Some(3.0 + 64.0));
        assert_eq!(grid.get(33, 0), None);
    }

    #[test]
    fn test_negative_deltas() {
        let data = payload(100.0, ByteOrder::Big, |row, col| {
            if row == 0 && col == 1 {
                -5
            } else {
                0
            }
        });
        let grid = decode_vhgt(&data, ByteOrder::Big).unwrap();
        assert_eq!(grid.get(0, 1), Some(95.0));
        assert_eq!(grid.get(0, 32), Some(95.0));
        assert_eq!(grid.get(1, 0), Some(100.0));
        assert_eq!(grid.min(), 95.0);
        assert_eq!(grid.max(), 100.0);
    }

    #[test]
    fn test_short_payload() {
        let data = payload(0.0, ByteOrder::Big, |_, _| 0);
        assert!(decode_vhgt(&data[..VHGT_MIN_SIZE - 1], ByteOrder::Big).is_err());
        assert!(decode_vhgt(&data[..VHGT_MIN_SIZE], ByteOrder::Big).is_ok());
    }
}
