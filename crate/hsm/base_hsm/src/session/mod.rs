mod attributes;
mod session_impl;

pub use session_impl::{ObjectFilter, Session};
