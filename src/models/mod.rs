pub mod artifact;
pub mod common;
pub mod latent;
pub mod request;

pub use artifact::*;
pub use common::*;
pub use latent::*;
pub use request::*;
