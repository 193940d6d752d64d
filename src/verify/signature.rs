//! Coarse visual signatures over window-relative regions.
//!
//! The signature is an 8x8 average hash plus the region's mean luma. The
//! region is split into a grid of 64 cells and each hash bit records whether
//! the cell is brighter than the mean of all cells. Cell sums come from a
//! summed-area table, so hashing a region costs the same regardless of its
//! size.

use crate::model::{
    element::VisualSignature,
    geometry::BBox,
    signals::Frame,
    ui_map::UiMap,
};

const GRID: i32 = 8;

/// Gradient magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: i32 = 32;

/// Summed-area table of frame luma over one window-relative region.
#[derive(Debug, Clone)]
pub struct LumaIntegral {
    region: BBox,
    sums: Vec<u64>,
}

impl LumaIntegral {
    pub fn from_frame(frame: &Frame) -> Self {
        Self::over(frame, BBox::new(0, 0, frame.width(), frame.height()))
    }

    /// Table covering only `region` clipped to the frame. Boxes outside the
    /// clipped region cannot be hashed.
    pub fn from_region(frame: &Frame, region: &BBox) -> Self {
        let clipped = frame.clip(region).unwrap_or(BBox::new(0, 0, 0, 0));
        Self::over(frame, clipped)
    }

    fn over(frame: &Frame, region: BBox) -> Self {
        let width = region.w.max(0);
        let height = region.h.max(0);
        let stride = (width + 1) as usize;
        let mut sums = vec![0u64; stride * (height + 1) as usize];

        for y in 0..height {
            let mut row = 0u64;
            for x in 0..width {
                row += frame.luma(region.x + x, region.y + y) as u64;
                let idx = (y + 1) as usize * stride + (x + 1) as usize;
                sums[idx] = sums[idx - stride] + row;
            }
        }

        LumaIntegral { region, sums }
    }

    pub fn width(&self) -> i32 {
        self.region.w
    }

    pub fn height(&self) -> i32 {
        self.region.h
    }

    /// Window-relative area the table covers.
    pub fn region(&self) -> BBox {
        self.region
    }

    /// True when the whole box lies inside the covered region.
    pub fn contains(&self, bbox: &BBox) -> bool {
        bbox.w > 0
            && bbox.h > 0
            && bbox.x >= self.region.x
            && bbox.y >= self.region.y
            && bbox.right() <= self.region.right()
            && bbox.bottom() <= self.region.bottom()
    }

    /// Sum of luma over `[x0, x1) x [y0, y1)` in window coordinates. Caller
    /// keeps it in bounds.
    fn sum(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> u64 {
        let stride = (self.region.w + 1) as usize;
        let at = |x: i32, y: i32| {
            self.sums[(y - self.region.y) as usize * stride + (x - self.region.x) as usize]
        };
        at(x1, y1) + at(x0, y0) - at(x1, y0) - at(x0, y1)
    }

    /// Signature of `bbox`, or `None` if the box is not fully covered.
    pub fn average_hash(&self, bbox: &BBox) -> Option<VisualSignature> {
        if !self.contains(bbox) {
            return None;
        }

        let mut cells = [0f64; (GRID * GRID) as usize];
        for row in 0..GRID {
            let (y0, y1) = cell_span(bbox.y, bbox.h, row);
            for col in 0..GRID {
                let (x0, x1) = cell_span(bbox.x, bbox.w, col);
                let area = ((x1 - x0) * (y1 - y0)) as f64;
                cells[(row * GRID + col) as usize] = self.sum(x0, y0, x1, y1) as f64 / area;
            }
        }

        let mean = cells.iter().sum::<f64>() / cells.len() as f64;
        let bits = cells
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > mean)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i));

        let total = self.sum(bbox.x, bbox.y, bbox.right(), bbox.bottom());
        let mean_luma = (total as f64 / bbox.area() as f64).round().clamp(0.0, 255.0) as u8;

        Some(VisualSignature::new(bits, mean_luma))
    }
}

/// Pixel span of grid cell `i` along an axis. Never empty, even for regions
/// narrower than the grid.
fn cell_span(start: i32, len: i32, i: i32) -> (i32, i32) {
    let lo = start + i * len / GRID;
    let hi = (start + (i + 1) * len / GRID).max(lo + 1);
    (lo, hi)
}

pub fn average_hash(frame: &Frame, bbox: &BBox) -> Option<VisualSignature> {
    LumaIntegral::from_frame(frame).average_hash(bbox)
}

/// Fraction of pixels in `bbox` whose luma gradient exceeds the edge threshold.
/// A solid control drawn with a border sits well inside (0, 1); a blank or
/// fully textured region sits at the extremes.
pub fn edge_density(frame: &Frame, bbox: &BBox) -> Option<f64> {
    let region = frame.clip(bbox)?;
    if region.w < 2 || region.h < 2 {
        return None;
    }

    let mut edges = 0u64;
    let mut total = 0u64;
    for y in region.y..region.bottom() - 1 {
        for x in region.x..region.right() - 1 {
            let here = frame.luma(x, y) as i32;
            let gx = frame.luma(x + 1, y) as i32 - here;
            let gy = frame.luma(x, y + 1) as i32 - here;
            if gx.abs() + gy.abs() > EDGE_THRESHOLD {
                edges += 1;
            }
            total += 1;
        }
    }

    Some(edges as f64 / total as f64)
}

/// Derive a map whose elements carry signatures sampled from `frame`.
/// Elements not fully inside the frame keep no signature.
pub fn sign_map(map: UiMap, frame: &Frame) -> UiMap {
    let integral = LumaIntegral::from_frame(frame);
    let (fingerprint, built_at, schema_version, mut elements) = map.into_parts();

    for el in elements.iter_mut() {
        el.signature = integral.average_hash(&el.bbox);
    }

    UiMap::from_parts(fingerprint, built_at, schema_version, elements)
}
