//! Movie catalog read service: validated catalog queries served through a
//! request-level response cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
