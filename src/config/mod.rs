//! Configuration loading: JSON document listing the applications to proxy.

mod duration;
mod model;

pub use model::{ApplicationConfig, Configuration, InactiveAction, Protocol};
