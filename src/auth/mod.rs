mod bearer;
mod identity;
mod resolver;

pub use bearer::Caller;
pub use identity::{Identity, Role};
pub use resolver::{Handshake, IdentityResolver};
