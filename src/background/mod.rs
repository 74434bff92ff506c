//! Background services
//!
//! Long-running tasks supervised by the server's `JoinSet`. Each stops when
//! its `CancellationToken` fires.

pub mod digest;

pub use digest::{build_digest, DigestJob};
