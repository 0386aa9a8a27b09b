#![doc = include_str!("../README.md")]

mod config;
mod error;
mod item;
mod outcome;
mod pool;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::item::*;
pub use crate::outcome::*;
pub use crate::pool::*;
