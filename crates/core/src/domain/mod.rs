pub mod calendar;
pub mod conversation;
pub mod lead;
pub mod message;
pub mod mirror;
pub mod task;
