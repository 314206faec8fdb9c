pub mod resolver;
pub mod sessions;
