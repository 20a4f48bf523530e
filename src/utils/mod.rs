//! # 通用工具

pub mod single_flight;

pub use single_flight::SingleFlight;
