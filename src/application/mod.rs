//! Application services layer.

pub mod catalog;
pub mod error;
pub mod pagination;
pub mod repos;
pub mod request;
