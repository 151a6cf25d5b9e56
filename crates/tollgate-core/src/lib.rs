#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod timer;

pub use crate::clock::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::models::*;
pub use crate::session::*;
pub use crate::timer::*;
