//! Terminal window geometry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dimensions of a terminal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl Dimensions {
    /// Create new dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Build dimensions from optional request values, replacing missing or
    /// zero values with the matching field of `fallback`.
    pub fn or_default_from(cols: Option<u16>, rows: Option<u16>, fallback: Dimensions) -> Self {
        Self {
            rows: rows.filter(|r| *r > 0).unwrap_or(fallback.rows),
            cols: cols.filter(|c| *c > 0).unwrap_or(fallback.cols),
        }
    }

    /// Both values are positive.
    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }

    /// Reject zero-sized dimensions.
    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(Error::InvalidDimensions {
                rows: self.rows,
                cols: self.cols,
            })
        }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
