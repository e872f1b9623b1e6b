//! Scoring boundary
//!
//! Scoring itself is an external service: it receives the reference asset and
//! the recording and answers with a similarity score in [0, 100]. An optional
//! upload channel ships both to the service beforehand; a failed upload
//! prevents the scoring call.

pub mod client;
pub mod http;

pub use client::{validate_score, ScoringClient, UploadChannel};
pub use http::HttpScoringClient;
