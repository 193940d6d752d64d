pub mod kind;
pub mod map_builder;
pub mod normalize;
