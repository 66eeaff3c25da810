//! HTTP echo service
//!
//! The echo contract lives in [`handler`]: a request comes in, a response
//! goes out with status 200, the request's `content-type` and the request
//! body byte for byte. Everything else in this module is the HTTP/1.1
//! transport that feeds requests to a [`Handler`]: head parsing and body
//! framing in [`protocol`] and [`body`], dispatch in [`router`], and the
//! accept loop in [`server`].

pub mod body;
pub mod client;
pub mod config;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod server;


pub use body::Body;
pub use client::{ClientConfig, ClientConfigBuilder, HttpEchoClient};
pub use config::HttpConfig;
pub use handler::{echo, EchoHandler, Handler, InboundRequest, OutboundResponse};
pub use router::{echo_router, Router, ECHO_PATH};
pub use server::{serve, HttpEchoServer};
