//! HTTP plumbing for provider API communication
//!
//! This module provides:
//! - The [`Transport`] seam used by providers and batch engines
//! - A reqwest-backed production transport
//! - Error classification and normalization
//! - A scripted in-memory transport for tests

pub mod client;
pub mod error;
pub mod testing;
pub mod transport;

pub use client::{ReqwestTransport, TransportConfig};
pub use error::{ErrorClassification, HttpError};
pub use testing::{RecordedRequest, ScriptedTransport};
pub use transport::{params, Params, PostBody, Transport, TransportResponse};

// Re-export commonly used types
pub use reqwest::Method;
