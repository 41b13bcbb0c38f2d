pub mod classifier;
pub mod matrix;

pub use matrix::{
    build_matrix, Comparison, DateRow, EngineParams, HotelCell, ReportMatrix, RunPrices,
};
