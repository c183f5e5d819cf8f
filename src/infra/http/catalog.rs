use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{Path, State, rejection::FormRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{error, instrument, warn};

use crate::{
    application::{
        catalog::{CatalogError, CatalogService},
        error::HttpError,
        pagination::PagedResult,
        request::{CatalogRequest, RawPageForm, RawSearchForm, RequestValidator, ValidationError},
    },
    cache::{CacheKey, CachedResponse, ResponseCache},
    domain::entities::MovieRecord,
};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::catalog";

pub type CatalogCache = ResponseCache<HttpError>;

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<CatalogService>,
    pub cache: CatalogCache,
    pub validator: RequestValidator,
}

/// Wire shape of paginated movie listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoviePage {
    pub movies: Vec<MovieRecord>,
    pub pg_count: u64,
}

impl From<PagedResult<MovieRecord>> for MoviePage {
    fn from(page: PagedResult<MovieRecord>) -> Self {
        Self {
            movies: page.items,
            pg_count: page.page_count,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/play/{id}", get(play))
        .route("/category/{id}", post(category))
        .route("/allCategory", get(all_categories))
        .route("/mainCategory", get(main_categories))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn search(
    State(state): State<HttpState>,
    form: Result<Form<RawSearchForm>, FormRejection>,
) -> Response {
    let form = match read_form("search", form) {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    match state.validator.search(&form) {
        Ok(request) => respond(&state, request).await,
        Err(err) => reject("search", err),
    }
}

async fn play(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    match state.validator.movie(&id) {
        Ok(request) => respond(&state, request).await,
        Err(err) => reject("play", err),
    }
}

async fn category(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    form: Result<Form<RawPageForm>, FormRejection>,
) -> Response {
    let form = match read_form("category", form) {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    match state.validator.browse(&id, &form) {
        Ok(request) => respond(&state, request).await,
        Err(err) => reject("category", err),
    }
}

async fn all_categories(State(state): State<HttpState>) -> Response {
    respond(&state, state.validator.list_categories()).await
}

async fn main_categories(State(state): State<HttpState>) -> Response {
    respond(&state, state.validator.list_main_categories()).await
}

/// Unwraps a form body. A request without a form content type reads as an
/// empty form so the validator names the missing field; any other rejection
/// is reported as is.
fn read_form<T: Default>(
    handler: &'static str,
    form: Result<Form<T>, FormRejection>,
) -> Result<T, HttpError> {
    match form {
        Ok(Form(form)) => Ok(form),
        Err(FormRejection::InvalidFormContentType(_)) => Ok(T::default()),
        Err(rejection) => {
            warn!(
                handler,
                status = rejection.status().as_u16(),
                rejection = %rejection,
                "Rejected request form"
            );
            Err(HttpError::from_error(
                SOURCE,
                rejection.status(),
                "Invalid request form",
                &rejection,
            ))
        }
    }
}

fn reject(handler: &'static str, err: ValidationError) -> Response {
    warn!(
        handler,
        field = err.field,
        reason = err.reason.describe(),
        "Rejected request parameters"
    );
    HttpError::from(err).into_response()
}

/// Serves a validated request through the response cache.
#[instrument(skip_all, fields(endpoint = request.endpoint().as_str()))]
async fn respond(state: &HttpState, request: CatalogRequest) -> Response {
    let key = CacheKey::build(&request);
    let catalog = Arc::clone(&state.catalog);
    match state
        .cache
        .get_or_compute(key, move || compute(catalog, request))
        .await
    {
        Ok(cached) => cached.into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn compute(
    catalog: Arc<CatalogService>,
    request: CatalogRequest,
) -> Result<CachedResponse, HttpError> {
    let endpoint = request.endpoint().as_str();
    match request {
        CatalogRequest::Search(params) => render(
            endpoint,
            catalog
                .search(&params.keyword, params.window)
                .await
                .map(MoviePage::from),
        ),
        CatalogRequest::GetById(params) => render(endpoint, catalog.get_by_id(params.id).await),
        CatalogRequest::BrowseByCategory(params) => render(
            endpoint,
            catalog
                .browse_by_category(params.category_id, params.window)
                .await
                .map(MoviePage::from),
        ),
        CatalogRequest::ListCategories => render(endpoint, catalog.list_categories().await),
        CatalogRequest::ListMainCategories => {
            render(endpoint, catalog.list_main_categories().await)
        }
    }
}

fn render<T: Serialize>(
    endpoint: &'static str,
    result: Result<T, CatalogError>,
) -> Result<CachedResponse, HttpError> {
    let value = result.map_err(|err| {
        if let CatalogError::Storage { operation, source } = &err {
            error!(endpoint, operation, error = %source, "Catalog storage query failed");
        }
        HttpError::from(err)
    })?;

    CachedResponse::json(&value).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &err,
        )
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::FromRequest,
        http::{Method, Request, header::CONTENT_TYPE},
    };

    use super::*;

    async fn extract(
        content_type: Option<&str>,
        body: &'static str,
    ) -> Result<Form<RawSearchForm>, FormRejection> {
        let mut builder = Request::builder().method(Method::POST).uri("/search");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder.body(Body::from(body)).expect("request builds");
        Form::<RawSearchForm>::from_request(request, &()).await
    }

    #[tokio::test]
    async fn duplicate_fields_are_reported_as_form_errors() {
        let form = extract(
            Some("application/x-www-form-urlencoded"),
            "keyword=a&keyword=b&pg=1&num=10",
        )
        .await;

        let err = read_form("search", form).expect_err("duplicate keyword");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(
            err.report()
                .messages
                .iter()
                .any(|message| message.contains("duplicate field")),
            "report: {:?}",
            err.report().messages
        );
    }

    #[tokio::test]
    async fn missing_content_type_reads_as_empty_form() {
        let form = extract(None, "keyword=drama&pg=1&num=10").await;

        let form = read_form("search", form).expect("treated as empty");
        assert!(form.keyword.is_none());
    }

    #[tokio::test]
    async fn well_formed_bodies_pass_through() {
        let form = extract(
            Some("application/x-www-form-urlencoded"),
            "keyword=drama&pg=1&num=10",
        )
        .await;

        let form = read_form("search", form).expect("parses");
        assert_eq!(form.keyword.as_deref(), Some("drama"));
    }
}
