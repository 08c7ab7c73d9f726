//! Pixel-registered source records that travel with a scene.
//!
//! Every transform applied to a scene image (rotation, the SOSS acquisition
//! shift, frame crops) is mirrored on the table so `x`/`y` always point at the
//! source in whatever frame the table was last paired with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Morphology;
use crate::image_size::ImageSize;
use crate::rotate::rotate_pixel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SourceKind {
    Point,
    Extended(Morphology),
}

/// One placed source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Row position in the catalog the source came from
    pub index: usize,
    /// The catalog's own id for the source
    pub id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub ra: f64,
    pub dec: f64,
    pub magnitudes: BTreeMap<String, f64>,
    /// Magnitude in the band the scene was composed in
    pub magnitude: f64,
    /// Count rate deposited on the canvas
    pub flux: f64,
    /// Column in the current frame
    pub x: f64,
    /// Row in the current frame
    pub y: f64,
    /// Separation from the field centre in arcseconds
    pub distance_arcsec: f64,
    /// Position angle of the frame this record belongs to
    pub position_angle: Option<f64>,
}

/// Ordered collection of [`SourceRecord`]s for one scene or one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    records: Vec<SourceRecord>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SourceRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add `(dx, dy)` to every pixel position
    pub fn shift(&mut self, dx: f64, dy: f64) {
        for record in &mut self.records {
            record.x += dx;
            record.y += dy;
        }
    }

    /// Move every position as if its frame of `size` were rotated by `angle`
    pub fn rotate(&mut self, angle_degrees: f64, size: ImageSize) {
        for record in &mut self.records {
            let (x, y) = rotate_pixel(record.x, record.y, angle_degrees, size);
            record.x = x;
            record.y = y;
        }
    }

    pub fn tag_position_angle(&mut self, angle: f64) {
        for record in &mut self.records {
            record.position_angle = Some(angle);
        }
    }

    /// Records tagged with `angle`
    pub fn at_angle(&self, angle: f64) -> impl Iterator<Item = &SourceRecord> {
        self.records
            .iter()
            .filter(move |r| r.position_angle == Some(angle))
    }

    /// Concatenate tables in order
    pub fn stack<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = SourceTable>,
    {
        Self {
            records: tables.into_iter().flat_map(|t| t.records).collect(),
        }
    }
}

impl From<Vec<SourceRecord>> for SourceTable {
    fn from(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a SourceTable {
    type Item = &'a SourceRecord;
    type IntoIter = std::slice::Iter<'a, SourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
