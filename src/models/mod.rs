//! Data models

mod deployment;
mod framework;
mod guest;

pub use deployment::*;
pub use framework::*;
pub use guest::*;
