pub mod h2;
pub mod stream;
pub mod types;
pub mod utils;

pub use h2::{Dispatcher, H2Transport, ResponseFuture};
pub use stream::{parse_target, Target, TransportStream};
pub use types::*;
