pub mod backend;
pub mod capture;
pub mod error;
pub mod label;
pub mod num_util;
pub mod serialize;
pub mod state;
