pub mod trading;
pub mod position;
pub mod candle;

pub use trading::*;
pub use position::*;
pub use candle::*;
