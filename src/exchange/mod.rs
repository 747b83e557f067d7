pub mod constraints;

pub use constraints::*;
