use image::{Rgb, RgbImage};
use semantic_ui_map::model::{
    geometry::{BBox, Point},
    signals::Frame,
};

pub const BACKGROUND: Rgb<u8> = Rgb([128, 128, 128]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

pub fn blank(w: u32, h: u32) -> RgbImage {
    RgbImage::from_pixel(w, h, BACKGROUND)
}

pub fn fill(img: &mut RgbImage, bbox: BBox, color: Rgb<u8>) {
    for y in bbox.y.max(0)..bbox.bottom().min(img.height() as i32) {
        for x in bbox.x.max(0)..bbox.right().min(img.width() as i32) {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// 2x2 checkerboard: black top-left and bottom-right, white elsewhere.
pub fn checker(img: &mut RgbImage, bbox: BBox) {
    let hw = bbox.w / 2;
    let hh = bbox.h / 2;
    fill(img, BBox::new(bbox.x, bbox.y, hw, hh), BLACK);
    fill(img, BBox::new(bbox.x + hw, bbox.y, bbox.w - hw, hh), WHITE);
    fill(img, BBox::new(bbox.x, bbox.y + hh, hw, bbox.h - hh), WHITE);
    fill(img, BBox::new(bbox.x + hw, bbox.y + hh, bbox.w - hw, bbox.h - hh), BLACK);
}

/// White box with a one pixel black border, like a text field.
pub fn bordered(img: &mut RgbImage, bbox: BBox) {
    fill(img, bbox, BLACK);
    fill(img, BBox::new(bbox.x + 1, bbox.y + 1, bbox.w - 2, bbox.h - 2), WHITE);
}

/// Horizontal stripes, like a line of text.
pub fn stripes(img: &mut RgbImage, bbox: BBox) {
    for row in 0..bbox.h {
        let color = if (row / 2) % 2 == 0 { BLACK } else { WHITE };
        fill(img, BBox::new(bbox.x, bbox.y + row, bbox.w, 1), color);
    }
}

pub fn frame(img: RgbImage) -> Frame {
    Frame::new(Point::new(0, 0), img)
}
