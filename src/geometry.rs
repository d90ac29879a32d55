//! Pixel/depth back-projection and rigid transforms.
//!
//! Everything here is pure: no I/O, no shared state.

use nalgebra::{Matrix4, Vector4};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::GeometryError;
use crate::frame::Intrinsics;

/// A 3D point in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// False for the `(0,0,0)` point produced by a zero depth sample.
    pub fn has_depth(&self) -> bool {
        self.z != 0.0
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// Wire form is a bare `[x, y, z]` array.
impl Serialize for Point3 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}

/// Back-project pixel `(u, v)` with raw depth `depth_raw` into camera space.
///
/// `depth_raw = 0` yields the origin. Callers must keep `(u, v)` inside the
/// depth image.
pub fn pixel_depth_to_point(u: u32, v: u32, depth_raw: f64, intrinsics: &Intrinsics) -> Point3 {
    let z = depth_raw * intrinsics.depth_scale;
    let x = (u as f64 - intrinsics.ppx) / intrinsics.fx * z;
    let y = (v as f64 - intrinsics.ppy) / intrinsics.fy * z;
    Point3 { x, y, z }
}

/// Integer center of an `[x1, y1, x2, y2]` box, clamped at zero.
pub fn bbox_center(bbox: [i32; 4]) -> (u32, u32) {
    let cx = (bbox[0] + bbox[2]) / 2;
    let cy = (bbox[1] + bbox[3]) / 2;
    (cx.max(0) as u32, cy.max(0) as u32)
}

/// Homogeneous 4x4 transform from camera space into an external frame.
///
/// The bottom row is expected to be `[0, 0, 0, 1]` but is not enforced.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Validate row-major rows into a transform.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, GeometryError> {
        if rows.len() != 4 {
            return Err(GeometryError::RowCount(rows.len()));
        }
        let mut matrix = Matrix4::zeros();
        for (row, values) in rows.iter().enumerate() {
            let values = values.as_ref();
            if values.len() != 4 {
                return Err(GeometryError::ColumnCount {
                    row,
                    len: values.len(),
                });
            }
            for (col, value) in values.iter().enumerate() {
                if !value.is_finite() {
                    return Err(GeometryError::NonFinite { row, col });
                }
                matrix[(row, col)] = *value;
            }
        }
        Ok(Self { matrix })
    }

    /// Build from a loosely typed config value: nested `[[..4]; 4]` rows or
    /// a flat row-major list of 16 numbers.
    pub fn from_value(value: &Value) -> Result<Self, GeometryError> {
        let items = value.as_array().ok_or(GeometryError::NotAMatrix)?;

        if items.len() == 16 && items.iter().all(|item| !item.is_array()) {
            let flat = items
                .iter()
                .enumerate()
                .map(|(i, item)| number(item, i / 4, i % 4))
                .collect::<Result<Vec<_>, _>>()?;
            let rows: Vec<&[f64]> = flat.chunks(4).collect();
            return Self::from_rows(&rows);
        }

        let mut rows = Vec::with_capacity(items.len());
        for (row, item) in items.iter().enumerate() {
            let cells = item.as_array().ok_or(GeometryError::NotAMatrix)?;
            let values = cells
                .iter()
                .enumerate()
                .map(|(col, cell)| number(cell, row, col))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(values);
        }
        Self::from_rows(&rows)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// `T * [x, y, z, 1]`, first three components.
    pub fn apply(&self, point: Point3) -> Result<Point3, GeometryError> {
        let p = self.matrix * Vector4::new(point.x, point.y, point.z, 1.0);
        let out = Point3::new(p[0], p[1], p[2]);
        if !out.is_finite() {
            return Err(GeometryError::NonFiniteResult);
        }
        Ok(out)
    }
}

fn number(value: &Value, row: usize, col: usize) -> Result<f64, GeometryError> {
    value.as_f64().ok_or(GeometryError::NonNumeric { row, col })
}

/// Validate `rows` and apply them to `point` in one call.
pub fn apply_rigid_transform<R: AsRef<[f64]>>(
    rows: &[R],
    point: Point3,
) -> Result<Point3, GeometryError> {
    RigidTransform::from_rows(rows)?.apply(point)
}
