#![doc = include_str!("../README.md")]

mod bridge;
mod dispatch;
mod error;
mod lookup;
mod payload;
mod router;
mod store;
mod types;

#[cfg(test)]
mod mock;

pub use crate::bridge::*;
pub use crate::dispatch::*;
pub use crate::error::*;
pub use crate::lookup::*;
pub use crate::payload::*;
pub use crate::router::*;
pub use crate::store::*;
pub use crate::types::*;
