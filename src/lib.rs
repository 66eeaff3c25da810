use crate::http::protocol::HttpProtocolError;
use thiserror::Error;

/// Error types for the httpecho library
#[derive(Error, Debug)]
pub enum EchoError {
    /// Socket-level errors (bind, accept, connect, read, write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP framing or parsing errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// UTF-8 encoding errors
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The server answered with something other than 200 OK
    #[error("Unexpected response status: {0}")]
    UnexpectedStatus(::http::StatusCode),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for the httpecho library
pub type Result<T> = std::result::Result<T, EchoError>;

pub mod common;
pub mod http;
pub mod security;

// Re-export main types for convenience
pub use common::{EchoClient, EchoServerTrait};
pub use crate::http::{
    echo, echo_router, serve, Body, ClientConfig, EchoHandler, Handler, HttpConfig,
    HttpEchoClient, HttpEchoServer, InboundRequest, OutboundResponse, Router,
};
