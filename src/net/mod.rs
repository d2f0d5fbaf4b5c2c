//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerSpecs (address → handler, insertion order)
//!     → binder.rs (effective options, UP, fail-fast bind)
//!     → listener.rs (SocketBinder creates the socket)
//!     → accept.rs (accept loop on an acceptor event loop)
//!     → worker event loop picked by the chooser
//!     → connection.rs (handler future runs to completion)
//!
//! Close:
//!     ListeningEndpoint::close → accept loop drops socket → CloseSignal fires
//! ```
//!
//! # Design Decisions
//! - Sockets are created with socket2 so options apply before `listen`
//! - Accepted streams move between loops as std sockets and re-register on arrival
//! - A close signal fires only after the socket is released

pub(crate) mod accept;
pub mod binder;
pub mod connection;
pub mod listener;
pub mod options;

pub use binder::ListenerBinder;
pub use connection::{ConnectionHandler, ConnectionId};
pub use listener::{
    CloseSignal, ListenerSpec, ListenerSpecs, ListeningEndpoint, ListeningEndpoints, SocketBinder, TcpBinder,
    WaitOutcome,
};
pub use options::{OptionValue, SocketOption, SocketOptionSet};
