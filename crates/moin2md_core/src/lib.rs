pub mod attachments;
pub mod config;
pub mod crawler;
pub mod links;
pub mod page;
pub mod pathing;
pub mod resolve;
pub mod translate;
