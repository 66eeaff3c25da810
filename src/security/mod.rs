//! Connection and request-size limits enforced by the transport

pub mod limits;

pub use limits::{
    ConnectionError, ConnectionGuard, ConnectionMetrics, ConnectionTracker, SizeError,
    SizeValidator,
};
