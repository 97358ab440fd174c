//! Network infrastructure for the agent provider.
//!
//! # Sub-modules
//!
//! - **`transport`** – The UDP socket, the two-lane send queue, and the named
//!   receive/send threads that drive them.
//!
//! - **`discovery`** – The `ServiceDiscovery` seam through which agents are
//!   found, plus the static list built from the config file.
//!
//! - **`mock`** – An in-memory socket for tests and dry runs.

pub mod discovery;
pub mod mock;
pub mod transport;
