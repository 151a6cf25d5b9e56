#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

pub mod identity;
pub mod nonce;
pub mod signer;

pub use crate::identity::*;
pub use crate::nonce::*;
pub use crate::signer::*;
