pub mod business;
pub mod conversation;
pub mod message;
pub mod tool;
