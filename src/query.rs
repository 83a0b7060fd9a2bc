//! Request parameters to SQL predicates.
//!
//! Each collection declares a [`QuerySpec`]: which parameters filter, which
//! columns `search` looks through, and which fields `ordering` may sort by.
//! Anything not declared is ignored. Values always travel as bound
//! parameters; only the whitelisted SQL fragments are spliced into the
//! statement text.

use libsql::Value;

use crate::api::{PageRequest, QueryParams};
use crate::error::FieldErrors;

pub const SEARCH_PARAM: &str = "search";
pub const ORDERING_PARAM: &str = "ordering";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
}

/// Equality filter: `predicate` holds exactly one `?` for the value.
#[derive(Debug, Clone, Copy)]
pub struct Filter {
    pub param: &'static str,
    pub predicate: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderField {
    pub param: &'static str,
    pub column: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct QuerySpec {
    pub filters: &'static [Filter],
    /// SQL expressions matched against the search term.
    pub search: &'static [&'static str],
    pub ordering: &'static [OrderField],
    /// Applied when the request names no usable ordering, e.g. `"-date_posted"`.
    pub default_ordering: Option<&'static str>,
    /// Final tie-break, always ascending.
    pub primary_key: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: &'static str,
    pub direction: Direction,
}

/// The WHERE and ORDER BY pieces of a list statement plus their bound values.
#[derive(Debug, Clone, Default)]
pub struct Clauses {
    conditions: Vec<String>,
    params: Vec<Value>,
    order: Vec<SortKey>,
    primary_key: &'static str,
}

impl Clauses {
    /// Adds a fixed predicate that is not driven by request parameters.
    pub fn push_condition(&mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.conditions.push(sql.into());
        self.params.extend(params);
    }

    pub fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn order_sql(&self) -> String {
        let mut keys: Vec<String> = self
            .order
            .iter()
            .map(|key| match key.direction {
                Direction::Asc => format!("{} ASC", key.column),
                Direction::Desc => format!("{} DESC", key.column),
            })
            .collect();
        if !self.primary_key.is_empty() && !self.order.iter().any(|k| k.column == self.primary_key) {
            keys.push(format!("{} ASC", self.primary_key));
        }
        if keys.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", keys.join(", "))
        }
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn params(&self) -> Vec<Value> {
        self.params.clone()
    }

    /// Bound values followed by `extra` (for LIMIT/OFFSET placeholders).
    pub fn params_with(&self, extra: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut params = self.params.clone();
        params.extend(extra);
        params
    }
}

/// ` LIMIT ? OFFSET ?` and its two values for a page, nothing for a full listing.
pub fn limit_clause(page: Option<PageRequest>) -> (&'static str, Vec<Value>) {
    match page {
        Some(page) => (
            " LIMIT ? OFFSET ?",
            vec![Value::Integer(i64::from(page.limit())), Value::Integer(i64::from(page.offset()))],
        ),
        None => ("", Vec::new()),
    }
}

fn parse_ordering(spec: &QuerySpec, raw: &str) -> Vec<SortKey> {
    let mut keys: Vec<SortKey> = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (name, direction) = match token.strip_prefix('-') {
            Some(name) => (name, Direction::Desc),
            None => (token, Direction::Asc),
        };
        let Some(field) = spec.ordering.iter().find(|f| f.param == name) else {
            continue;
        };
        if keys.iter().any(|k| k.column == field.column) {
            continue;
        }
        keys.push(SortKey {
            column: field.column,
            direction,
        });
    }
    keys
}

impl QuerySpec {
    /// Unknown parameters and ordering fields are ignored; a whitelisted
    /// integer filter carrying a non-integer is a field error.
    pub fn build(&self, params: &QueryParams) -> Result<Clauses, FieldErrors> {
        let mut clauses = Clauses {
            primary_key: self.primary_key,
            ..Clauses::default()
        };
        let mut errors = FieldErrors::new();

        for filter in self.filters {
            let Some(raw) = params.get(filter.param).map(|v| v.trim()) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            let value = match filter.kind {
                FieldKind::Text => Value::Text(raw.to_owned()),
                FieldKind::Integer => match raw.parse::<i64>() {
                    Ok(n) => Value::Integer(n),
                    Err(_) => {
                        errors.add(filter.param, "Enter a whole number.");
                        continue;
                    }
                },
            };
            clauses.push_condition(filter.predicate, [value]);
        }

        if let Some(term) = params.get(SEARCH_PARAM).map(|s| s.trim()) {
            if !term.is_empty() && !self.search.is_empty() {
                let any_field: Vec<String> = self
                    .search
                    .iter()
                    .map(|column| format!("instr(lower({column}), lower(?)) > 0"))
                    .collect();
                clauses.push_condition(
                    format!("({})", any_field.join(" OR ")),
                    self.search.iter().map(|_| Value::Text(term.to_owned())),
                );
            }
        }

        let requested = params
            .get(ORDERING_PARAM)
            .map(|raw| parse_ordering(self, raw))
            .unwrap_or_default();
        clauses.order = if requested.is_empty() {
            self.default_ordering
                .map(|raw| parse_ordering(self, raw))
                .unwrap_or_default()
        } else {
            requested
        };

        if errors.is_empty() { Ok(clauses) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKS: QuerySpec = QuerySpec {
        filters: &[
            Filter { param: "title", predicate: "books.title = ?", kind: FieldKind::Text },
            Filter { param: "publication_year", predicate: "books.publication_year = ?", kind: FieldKind::Integer },
        ],
        search: &["books.title", "authors.name"],
        ordering: &[
            OrderField { param: "title", column: "books.title" },
            OrderField { param: "publication_year", column: "books.publication_year" },
            OrderField { param: "id", column: "books.id" },
        ],
        default_ordering: None,
        primary_key: "books.id",
    };

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn no_parameters_means_primary_key_order() {
        let clauses = BOOKS.build(&params(&[])).unwrap();
        assert_eq!(clauses.where_sql(), "");
        assert_eq!(clauses.order_sql(), " ORDER BY books.id ASC");
        assert!(clauses.params().is_empty());
    }

    #[test]
    fn filters_bind_their_values() {
        let clauses = BOOKS
            .build(&params(&[("publication_year", "1949"), ("title", "1984")]))
            .unwrap();
        assert_eq!(
            clauses.where_sql(),
            " WHERE books.title = ? AND books.publication_year = ?"
        );
        assert_eq!(
            clauses.params(),
            vec![Value::Text("1984".into()), Value::Integer(1949)]
        );
    }

    #[test]
    fn unknown_and_empty_parameters_are_ignored() {
        let clauses = BOOKS
            .build(&params(&[("colour", "red"), ("title", "  "), ("ordering", "colour")]))
            .unwrap();
        assert_eq!(clauses.where_sql(), "");
        assert_eq!(clauses.order_sql(), " ORDER BY books.id ASC");
    }

    #[test]
    fn non_integer_values_for_integer_filters_are_field_errors() {
        let errors = BOOKS.build(&params(&[("publication_year", "nineteen")])).unwrap_err();
        assert!(errors.get("publication_year").is_some());
    }

    #[test]
    fn search_spans_every_whitelisted_column() {
        let clauses = BOOKS.build(&params(&[("search", "Animal")])).unwrap();
        assert_eq!(
            clauses.where_sql(),
            " WHERE (instr(lower(books.title), lower(?)) > 0 OR instr(lower(authors.name), lower(?)) > 0)"
        );
        assert_eq!(clauses.params().len(), 2);
    }

    #[test]
    fn negation_marker_sorts_descending_with_id_tie_break() {
        let clauses = BOOKS.build(&params(&[("ordering", "-publication_year")])).unwrap();
        assert_eq!(
            clauses.order_sql(),
            " ORDER BY books.publication_year DESC, books.id ASC"
        );
        let by_id = BOOKS.build(&params(&[("ordering", "-id")])).unwrap();
        assert_eq!(by_id.order_sql(), " ORDER BY books.id DESC");
    }

    #[test]
    fn default_ordering_applies_when_request_names_nothing_usable() {
        let spec = QuerySpec { default_ordering: Some("-title"), ..BOOKS };
        let clauses = spec.build(&params(&[("ordering", "bogus")])).unwrap();
        assert_eq!(clauses.order_sql(), " ORDER BY books.title DESC, books.id ASC");
    }

    #[test]
    fn fixed_conditions_come_before_limit_params() {
        let mut clauses = BOOKS.build(&params(&[("title", "Emma")])).unwrap();
        clauses.push_condition("books.publication_year < ?", [Value::Integer(2000)]);
        assert_eq!(
            clauses.params_with([Value::Integer(10), Value::Integer(0)]),
            vec![
                Value::Text("Emma".into()),
                Value::Integer(2000),
                Value::Integer(10),
                Value::Integer(0)
            ]
        );
    }
}
