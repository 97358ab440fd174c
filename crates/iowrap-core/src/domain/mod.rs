//! Domain entities for IOWrap.
//!
//! Everything in here is plain data plus the small amount of logic that
//! belongs to the data itself: descriptors used as map keys, the capability
//! report tree, subscription requests, the process-wide profile activation
//! set, and the device-order resolver.
//!
//! Nothing in this module touches threads, sockets, or OS APIs, so it can be
//! unit-tested anywhere.

pub mod descriptor;
pub mod device_order;
pub mod profile;
pub mod report;
pub mod subscription;
