pub mod conversation;
pub mod message;
pub mod search;
pub mod validation;
