pub mod consts;
pub mod dispatcher;
pub mod framing;
pub mod hpack;
mod read;
pub mod registry;
pub mod state;
pub mod transport;
mod write;

pub use dispatcher::Dispatcher;
pub use registry::{ResponseFuture, StreamRecord, StreamRegistry};
pub use state::{RecvEvent, RecvState, SendEvent, SendState, StreamStateMachine, Transition};
pub use transport::H2Transport;
