pub mod element;
pub mod fingerprint;
pub mod geometry;
pub mod signals;
pub mod ui_map;
