// src/wells.rs - Well-plate name to machine coordinate mapping
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Row letters, top to bottom. Plates with more rows are not supported.
pub const ROW_LETTERS: &str = "ABCDEFGHIJKLMNOP";

#[derive(Debug, Error, PartialEq)]
pub enum WellGridError {
    #[error("{rows} rows requested but only {max} row letters are defined")]
    TooManyRows { rows: usize, max: usize },
    #[error("A plate needs at least one row and one column (got {rows}x{cols})")]
    Empty { rows: usize, cols: usize },
    #[error("Plate geometry must be finite")]
    NonFinite,
}

/// Where well A1 sits and how far apart neighbouring wells are.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct PlateGeometry {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Offset between consecutive rows (A to B), applied to X.
    pub row_pitch: f64,
    /// Offset between consecutive columns (1 to 2), applied to Y.
    pub col_pitch: f64,
    pub rows: usize,
    pub cols: usize,
}

impl PlateGeometry {
    /// Standard 96-well layout (8x12, 9 mm pitch) with A1 at `(x, y)`.
    pub fn standard_96(origin_x: f64, origin_y: f64) -> Self {
        Self { origin_x, origin_y, row_pitch: 9.0, col_pitch: 9.0, rows: 8, cols: 12 }
    }
}

/// Well names mapped to logical `(x, y)`, in generation order: down each
/// column, then on to the next (A1, B1, ..., A2, B2, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WellGrid {
    wells: Vec<(String, (f64, f64))>,
}

impl WellGrid {
    pub fn generate(geometry: &PlateGeometry) -> Result<Self, WellGridError> {
        let PlateGeometry { origin_x, origin_y, row_pitch, col_pitch, rows, cols } = *geometry;
        if rows == 0 || cols == 0 {
            return Err(WellGridError::Empty { rows, cols });
        }
        if rows > ROW_LETTERS.len() {
            return Err(WellGridError::TooManyRows { rows, max: ROW_LETTERS.len() });
        }
        if ![origin_x, origin_y, row_pitch, col_pitch].iter().all(|v| v.is_finite()) {
            return Err(WellGridError::NonFinite);
        }

        let mut wells = Vec::with_capacity(rows * cols);
        for col in 0..cols {
            let y = origin_y + col as f64 * col_pitch;
            for (row, letter) in ROW_LETTERS.chars().take(rows).enumerate() {
                let x = origin_x + row as f64 * row_pitch;
                wells.push((format!("{}{}", letter, col + 1), (x, y)));
            }
        }
        tracing::debug!("Generated {} wells ({}x{})", wells.len(), rows, cols);
        Ok(Self { wells })
    }

    pub fn get(&self, name: &str) -> Option<(f64, f64)> {
        self.wells.iter().find(|(n, _)| n == name).map(|(_, xy)| *xy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (f64, f64))> {
        self.wells.iter().map(|(n, xy)| (n.as_str(), *xy))
    }

    pub fn names(&self) -> Vec<&str> {
        self.wells.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }
}
