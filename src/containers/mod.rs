pub mod coord_map;
pub mod ring;

pub use coord_map::CoordMap;
pub use ring::SpscRing;
