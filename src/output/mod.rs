// Output module for Patrol

pub mod errors;
pub mod events;
pub mod terminal;

pub use errors::*;
pub use events::*;
pub use terminal::*;
