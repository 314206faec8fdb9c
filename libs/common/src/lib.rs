pub mod id;
pub mod session;

pub use session::{normalize_team, Identity, Session};
