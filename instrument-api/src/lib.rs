//! Types and interfaces that drivers and the session daemon use to
//! interact with each other: the value envelope, the key registry, the
//! transport layer, the driver contract, and the data-feed packet
//! taxonomy.
//!
//! This crate has no knowledge of any specific instrument; it only
//! defines the shapes concrete drivers (in `drivers/*`) and the session
//! daemon (`instrd`) agree on.

pub mod driver;
pub mod error;
pub mod feed;
pub mod key;
pub mod limiter;
pub mod packet;
pub mod registry;
pub mod transport;
pub mod value;

pub use error::{Error, Result};
pub use key::Key;
pub use value::Value;
