pub mod admin;
pub mod events;
pub mod mechanic;
pub mod public;
