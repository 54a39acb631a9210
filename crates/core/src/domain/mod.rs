pub mod action;
pub mod conversation;
pub mod tool;
