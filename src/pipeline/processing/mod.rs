// Listing processing stages: clean, normalize, dedup, enrich, quantize, score

pub mod clean;
pub mod dedup;
pub mod enrich;
pub mod normalize;
pub mod quantize;
pub mod score;
