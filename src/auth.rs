//! Auth-domain identifiers, role sets, secrets, and temporary database users.

pub mod id;
pub mod role;
pub mod secret;
pub mod user;

pub use id::*;
pub use role::*;
pub use secret::*;
pub use user::*;
