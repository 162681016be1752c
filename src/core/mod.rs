pub mod bounds;
pub mod constants;
pub mod crs;
pub mod geo;
