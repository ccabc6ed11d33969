pub mod application;
pub mod audit;
pub mod evaluation;
pub mod notification;
pub mod opportunity;
pub mod student;
pub mod user;
