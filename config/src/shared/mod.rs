mod adapter;
mod base;
mod credentials;
mod routing;

pub use adapter::*;
pub use base::*;
pub use credentials::*;
pub use routing::*;
