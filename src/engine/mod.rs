pub mod account;
pub mod backtest;
pub mod batch;
pub mod exits;
pub mod results;

pub use account::*;
pub use backtest::*;
pub use batch::*;
pub use exits::*;
pub use results::*;
