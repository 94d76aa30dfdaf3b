pub mod events;
pub mod speech;

pub use events::{ClientEvent, ServerEvent};
