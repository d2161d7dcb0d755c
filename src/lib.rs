//! Channel follower collection and quota-bounded Warpcast direct casts.
//!
//! The two binaries share nothing but the FID list and daily counters kept by
//! [`store::FileStore`].
pub mod collector;
pub mod config;
pub mod model;
pub mod sender;
pub mod store;
pub mod warpcast;
