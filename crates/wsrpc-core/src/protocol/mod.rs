//! Protocol module: close-status classification and the JSON-RPC message model.

pub mod close;
pub mod message;

pub use close::{classify, CloseCategory, CloseStatus};
pub use message::{error_codes, Message, MessageError, Request, Response, ResponseError};
