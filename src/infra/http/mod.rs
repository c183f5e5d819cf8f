mod catalog;
mod middleware;

pub use catalog::{CatalogCache, HttpState, MoviePage, build_router};
pub use middleware::RequestContext;
