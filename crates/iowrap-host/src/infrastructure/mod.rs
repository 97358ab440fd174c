//! Infrastructure layer for the IOWrap host.
//!
//! Contains OS-facing adapters: the vendor input API seams, the UDP agent
//! transport, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `iowrap_core` only.  The
//! `application` layer builds providers on top of the traits defined here.

pub mod network;
pub mod sample_source;
pub mod storage;
