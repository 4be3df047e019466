//! Coordinate store: the physical position of every LED.
//!
//! The layout file is a small comma-separated table, one row per LED:
//!
//! ```text
//! ID,X,Y
//! 0,12.5,3.0
//! 1,14.0,3.2
//! ```
//!
//! Row order is wiring order. It decides the index of each LED in every
//! frame, so it is preserved exactly. A header row is optional; with one,
//! the `x` and `y` columns are found by name and anything else (like `ID`)
//! is ignored. Without one, the first two columns are x and y.

use crate::{Result, WakeLightError};
use std::fs;
use std::path::Path;

/// A single LED: its wiring index and where it sits in layout space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LedPosition {
    pub index: usize,
    pub x: f32,
    pub y: f32,
}

/// How pixel coordinates relate to layout coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// Layout coordinates are image pixel coordinates.
    #[default]
    Pixels,
    /// Layout coordinates are scaled into the unit square (divided by the
    /// max x and max y), and pixels are mapped to `x / width, y / height`.
    /// One layout then fits images of any size.
    Normalized,
}

impl CoordinateSpace {
    /// Where pixel (`px`, `py`) of a `width`×`height` image lands in layout space.
    pub fn pixel_to_layout(self, px: u32, py: u32, width: u32, height: u32) -> (f32, f32) {
        match self {
            Self::Pixels => (px as f32, py as f32),
            Self::Normalized => (
                px as f32 / width.max(1) as f32,
                py as f32 / height.max(1) as f32,
            ),
        }
    }
}

/// All LED positions, indexed by wiring order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedLayout {
    positions: Vec<LedPosition>,
}

impl LedLayout {
    /// Build a layout from points given in wiring order.
    pub fn from_points(points: &[(f32, f32)]) -> Self {
        let positions = points
            .iter()
            .enumerate()
            .map(|(index, &(x, y))| LedPosition { index, x, y })
            .collect();
        Self { positions }
    }

    /// Read a layout file. Missing or malformed files are an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            WakeLightError::layout(format!("cannot read {}: {e}", path.display()))
        })?;
        let layout = Self::parse(&text)?;
        tracing::info!("Loaded {} LED positions from {}", layout.len(), path.display());
        Ok(layout)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rows = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .peekable();

        // A header is any first row that is not entirely numeric.
        let mut columns = (0, 1);
        if let Some(&(line_no, first)) = rows.peek() {
            let fields: Vec<&str> = first.split(',').map(str::trim).collect();
            if fields.iter().any(|f| f.parse::<f32>().is_err()) {
                columns = header_columns(&fields).ok_or_else(|| {
                    WakeLightError::layout(format!(
                        "line {line_no}: header must name an x and a y column"
                    ))
                })?;
                rows.next();
            }
        }

        let mut points = Vec::new();
        for (line_no, line) in rows {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let x = parse_field(&fields, columns.0, line_no, "x")?;
            let y = parse_field(&fields, columns.1, line_no, "y")?;
            points.push((x, y));
        }

        Ok(Self::from_points(&points))
    }

    pub fn positions(&self) -> &[LedPosition] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Copy of this layout with the given coordinate space applied.
    pub fn in_space(&self, space: CoordinateSpace) -> Self {
        match space {
            CoordinateSpace::Pixels => self.clone(),
            CoordinateSpace::Normalized => self.normalized(),
        }
    }

    /// Divide every x by the max x and every y by the max y.
    ///
    /// An axis whose max is not positive is left untouched.
    pub fn normalized(&self) -> Self {
        let max_x = self.positions.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        let max_y = self.positions.iter().map(|p| p.y).fold(f32::MIN, f32::max);
        let scale = |v: f32, max: f32| if max > 0.0 { v / max } else { v };

        let positions = self
            .positions
            .iter()
            .map(|p| LedPosition {
                index: p.index,
                x: scale(p.x, max_x),
                y: scale(p.y, max_y),
            })
            .collect();
        Self { positions }
    }

    /// Stable FNV-1a digest of the positions, used to tell whether a cached
    /// frame was rendered for this exact layout.
    pub fn digest(&self) -> u64 {
        crate::fnv1a(
            self.positions
                .iter()
                .flat_map(|p| p.x.to_bits().to_le_bytes().into_iter().chain(p.y.to_bits().to_le_bytes())),
        )
    }
}

fn header_columns(fields: &[&str]) -> Option<(usize, usize)> {
    let find = |name: &str| fields.iter().position(|f| f.eq_ignore_ascii_case(name));
    Some((find("x")?, find("y")?))
}

fn parse_field(fields: &[&str], column: usize, line_no: usize, name: &str) -> Result<f32> {
    let raw = fields.get(column).ok_or_else(|| {
        WakeLightError::layout(format!("line {line_no}: missing {name} column"))
    })?;
    let value: f32 = raw.parse().map_err(|_| {
        WakeLightError::layout(format!("line {line_no}: {name} value {raw:?} is not a number"))
    })?;
    if !value.is_finite() {
        return Err(WakeLightError::layout(format!(
            "line {line_no}: {name} value {raw:?} is not finite"
        )));
    }
    Ok(value)
}
