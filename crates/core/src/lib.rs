//! Core library: image intake, compression, batch analysis, normalization, reports.

pub mod classifier;
pub mod compressor;
pub mod config;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scanner;
pub mod session;
