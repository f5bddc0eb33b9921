//! Job slot allocation.

pub mod ring;

pub use ring::JobRing;
