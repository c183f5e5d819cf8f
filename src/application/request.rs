//! Typed, range-checked catalog requests parsed from raw string inputs.

use std::num::{IntErrorKind, NonZeroU32};

use serde::Deserialize;
use thiserror::Error;

use crate::application::pagination::PageWindow;

/// Logical operation a request targets, independent of route syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Search,
    GetById,
    BrowseByCategory,
    ListCategories,
    ListMainCategories,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Search => "search",
            Endpoint::GetById => "get_by_id",
            Endpoint::BrowseByCategory => "browse_by_category",
            Endpoint::ListCategories => "list_categories",
            Endpoint::ListMainCategories => "list_main_categories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    MissingField,
    NotAnInteger,
    OutOfRange,
}

impl ValidationReason {
    pub fn describe(self) -> &'static str {
        match self {
            ValidationReason::MissingField => "is missing",
            ValidationReason::NotAnInteger => "is not an integer",
            ValidationReason::OutOfRange => "is out of range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("field `{field}` {}", .reason.describe())]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: ValidationReason,
}

impl ValidationError {
    fn new(field: &'static str, reason: ValidationReason) -> Self {
        Self { field, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub keyword: String,
    pub window: PageWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieParams {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseParams {
    pub category_id: i64,
    pub window: PageWindow,
}

/// A fully validated request. Every declared parameter is present and within
/// its domain; values never change after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRequest {
    Search(SearchParams),
    GetById(MovieParams),
    BrowseByCategory(BrowseParams),
    ListCategories,
    ListMainCategories,
}

/// A typed parameter value as seen by the cache key builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue<'a> {
    Text(&'a str),
    Int(i64),
}

impl CatalogRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            CatalogRequest::Search(_) => Endpoint::Search,
            CatalogRequest::GetById(_) => Endpoint::GetById,
            CatalogRequest::BrowseByCategory(_) => Endpoint::BrowseByCategory,
            CatalogRequest::ListCategories => Endpoint::ListCategories,
            CatalogRequest::ListMainCategories => Endpoint::ListMainCategories,
        }
    }

    /// Every response-affecting parameter, in a fixed per-endpoint order.
    pub fn params(&self) -> Vec<(&'static str, ParamValue<'_>)> {
        match self {
            CatalogRequest::Search(p) => vec![
                ("keyword", ParamValue::Text(&p.keyword)),
                ("page", ParamValue::Int(p.window.page().into())),
                ("page_size", ParamValue::Int(p.window.page_size().into())),
            ],
            CatalogRequest::GetById(p) => vec![("id", ParamValue::Int(p.id))],
            CatalogRequest::BrowseByCategory(p) => vec![
                ("category_id", ParamValue::Int(p.category_id)),
                ("page", ParamValue::Int(p.window.page().into())),
                ("page_size", ParamValue::Int(p.window.page_size().into())),
            ],
            CatalogRequest::ListCategories | CatalogRequest::ListMainCategories => Vec::new(),
        }
    }
}

/// Raw form body of `POST /search`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSearchForm {
    pub keyword: Option<String>,
    pub pg: Option<String>,
    pub num: Option<String>,
}

/// Raw form body of `POST /category/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPageForm {
    pub pg: Option<String>,
    pub num: Option<String>,
}

/// Parses raw inputs into [`CatalogRequest`]s. Pure: no I/O, no logging.
#[derive(Debug, Clone, Copy)]
pub struct RequestValidator {
    max_page_size: u32,
}

impl RequestValidator {
    pub fn new(max_page_size: NonZeroU32) -> Self {
        Self {
            max_page_size: max_page_size.get(),
        }
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    pub fn search(&self, raw: &RawSearchForm) -> Result<CatalogRequest, ValidationError> {
        let keyword = raw
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ValidationError::new("keyword", ValidationReason::MissingField))?;
        let window = self.window(raw.pg.as_deref(), raw.num.as_deref())?;

        Ok(CatalogRequest::Search(SearchParams {
            keyword: keyword.to_string(),
            window,
        }))
    }

    pub fn movie(&self, raw_id: &str) -> Result<CatalogRequest, ValidationError> {
        let id = parse_positive_id("id", Some(raw_id))?;
        Ok(CatalogRequest::GetById(MovieParams { id }))
    }

    pub fn browse(
        &self,
        raw_category_id: &str,
        raw: &RawPageForm,
    ) -> Result<CatalogRequest, ValidationError> {
        let category_id = parse_positive_id("id", Some(raw_category_id))?;
        let window = self.window(raw.pg.as_deref(), raw.num.as_deref())?;
        Ok(CatalogRequest::BrowseByCategory(BrowseParams {
            category_id,
            window,
        }))
    }

    pub fn list_categories(&self) -> CatalogRequest {
        CatalogRequest::ListCategories
    }

    pub fn list_main_categories(&self) -> CatalogRequest {
        CatalogRequest::ListMainCategories
    }

    fn window(&self, pg: Option<&str>, num: Option<&str>) -> Result<PageWindow, ValidationError> {
        let page = parse_bounded("pg", pg, 1, u32::MAX)?;
        let page_size = parse_bounded("num", num, 1, self.max_page_size)?;
        Ok(PageWindow::new(page, page_size))
    }
}

fn parse_integer(field: &'static str, raw: Option<&str>) -> Result<i64, ValidationError> {
    let raw = raw
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ValidationError::new(field, ValidationReason::MissingField))?;

    raw.parse::<i64>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            ValidationError::new(field, ValidationReason::OutOfRange)
        }
        _ => ValidationError::new(field, ValidationReason::NotAnInteger),
    })
}

fn parse_positive_id(field: &'static str, raw: Option<&str>) -> Result<i64, ValidationError> {
    let value = parse_integer(field, raw)?;
    if value < 1 {
        return Err(ValidationError::new(field, ValidationReason::OutOfRange));
    }
    Ok(value)
}

fn parse_bounded(
    field: &'static str,
    raw: Option<&str>,
    min: u32,
    max: u32,
) -> Result<u32, ValidationError> {
    let value = parse_integer(field, raw)?;
    if value < i64::from(min) || value > i64::from(max) {
        return Err(ValidationError::new(field, ValidationReason::OutOfRange));
    }
    u32::try_from(value).map_err(|_| ValidationError::new(field, ValidationReason::OutOfRange))
}
