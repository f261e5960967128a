//! Implementations of the broker traits

#[cfg(any(test, feature = "test"))]
pub mod mock;
pub mod redis;
