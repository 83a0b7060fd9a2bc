use std::collections::HashMap;

use axum::{
    Json,
    extract::FromRequest,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AppError;

/// JSON body whose rejections come back in the API's error shape.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct Payload<T>(pub T);

/// Urlencoded form body, for the page routes.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Form), rejection(AppError))]
pub struct FormPayload<T>(pub T);

/// Raw query string pairs; the query layer decides which ones matter.
pub type QueryParams = HashMap<String, String>;

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: u32,
    pub size: u32,
}

impl PageRequest {
    /// Reads `?page=`; a missing page is the first one, anything unparseable is a 404.
    pub fn from_params(params: &QueryParams, size: u32) -> Result<Self, AppError> {
        let number = match params.get("page").map(|p| p.trim()) {
            None | Some("") => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(AppError::not_found("Invalid page.")),
            },
        };
        Ok(PageRequest { number, size })
    }

    pub fn limit(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> u32 {
        (self.number - 1) * self.size
    }

    pub fn num_pages(&self, count: u64) -> u32 {
        let pages = count.div_ceil(u64::from(self.size));
        u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
    }

    /// Page one always exists; past the end is a 404.
    pub fn check_in_range(&self, count: u64) -> Result<(), AppError> {
        if self.number > self.num_pages(count) {
            return Err(AppError::not_found("Invalid page."));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: u64,
    pub page: u32,
    pub num_pages: u32,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, count: u64, results: Vec<T>) -> Self {
        let num_pages = request.num_pages(count);
        Page {
            count,
            page: request.number,
            num_pages,
            next: (request.number < num_pages).then_some(request.number + 1),
            previous: (request.number > 1).then(|| request.number - 1),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn page_defaults_to_first() {
        let page = PageRequest::from_params(&params(&[]), 10).unwrap();
        assert_eq!(page, PageRequest { number: 1, size: 10 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn invalid_pages_are_not_found() {
        assert!(PageRequest::from_params(&params(&[("page", "0")]), 10).is_err());
        assert!(PageRequest::from_params(&params(&[("page", "two")]), 10).is_err());

        let third = PageRequest::from_params(&params(&[("page", "3")]), 10).unwrap();
        assert_eq!(third.offset(), 20);
        assert!(third.check_in_range(21).is_ok());
        assert!(third.check_in_range(20).is_err());
    }

    #[test]
    fn empty_collections_still_have_one_page() {
        let first = PageRequest { number: 1, size: 10 };
        assert!(first.check_in_range(0).is_ok());
        let page: Page<i32> = Page::new(first, 0, vec![]);
        assert_eq!(page.num_pages, 1);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);
    }

    #[test]
    fn envelope_links_neighbouring_pages() {
        let page = Page::new(PageRequest { number: 2, size: 10 }, 25, vec![1, 2, 3]);
        assert_eq!(page.num_pages, 3);
        assert_eq!(page.next, Some(3));
        assert_eq!(page.previous, Some(1));
    }
}
