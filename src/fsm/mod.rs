pub mod bridge;
pub mod chart;
pub mod interpreter;
