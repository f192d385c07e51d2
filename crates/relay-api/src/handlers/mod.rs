//! HTTP request handlers for the streaming front

pub mod sse;
