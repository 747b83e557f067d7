pub mod sizing;

pub use sizing::*;
