//! JSON-RPC 2.0 message model and `Content-Length` framing.
//!
//! This crate carries the wire layer shared by the bridge server and its
//! client: a small message model ([`message`]) and an async codec
//! ([`codec`]) that reads and writes the base protocol used by LSP and
//! vscode-jsonrpc:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"vfs/input/exists"}
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{MessageReader, MessageWriter, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::{Error, Result};
pub use message::{Message, Notification, Request, RequestId, Response, ResponseError};
