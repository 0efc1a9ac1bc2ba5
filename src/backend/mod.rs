pub mod analyze;
pub mod trace_viewer;
pub mod visualize;
