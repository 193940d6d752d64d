use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Axis-aligned box. Whether it is absolute or window-relative depends on
/// where it lives: detections carry absolute boxes, `SemanticElement`s never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        BBox {
            x,
            y,
            w: w.max(0),
            h: h.max(0),
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn area(&self) -> i64 {
        self.w as i64 * self.h as i64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }

    /// Integer click point at the box center.
    pub fn center_point(&self) -> Point {
        Point::new(self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> BBox {
        BBox {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    pub fn intersection_area(&self, other: &BBox) -> i64 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0 || h <= 0 {
            0
        } else {
            w as i64 * h as i64
        }
    }

    /// Intersection over the smaller of the two areas.
    ///
    /// Text boxes reported by OCR usually sit inside the control they name, so
    /// plain IoU would undervalue the match.
    pub fn overlap_ratio(&self, other: &BBox) -> f64 {
        let smaller = self.area().min(other.area());
        if smaller == 0 {
            return 0.0;
        }
        self.intersection_area(other) as f64 / smaller as f64
    }

    pub fn center_distance(&self, other: &BBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Gap between box edges; 0 when they touch or overlap.
    pub fn edge_gap(&self, other: &BBox) -> i32 {
        let dx = (other.x - self.right()).max(self.x - other.right()).max(0);
        let dy = (other.y - self.bottom()).max(self.y - other.bottom()).max(0);
        dx.max(dy)
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.h == 0 {
            return 0.0;
        }
        self.w as f64 / self.h as f64
    }
}

/// Window position and size in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl WindowRect {
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn to_relative(&self, abs: &BBox) -> BBox {
        abs.translate(-self.x, -self.y)
    }

    pub fn to_absolute(&self, rel: Point) -> Point {
        rel.offset(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMeta {
    pub title: String,
    pub rect: WindowRect,
}

/// Opaque window selector handed to the platform helper (title, XID or HWND).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub String);

impl WindowHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        WindowHandle(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
