pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod typing;
pub mod unread;

pub use dispatcher::{Dispatcher, GatewayConfig};
pub use error::HandlerError;
