//! Input validation for list queries and credential bodies.
//!
//! Every rule is checked and every failure is collected, so a client gets all
//! problems with its request in one 422 response instead of fixing them one
//! at a time.

use std::collections::BTreeMap;
use std::fmt;

use validator::ValidateEmail;

use crate::models::{ListQuery, TOKEN_PLAINTEXT_LEN};

// =============================================================================
// Validation Constants
// =============================================================================

/// Largest accepted `page_size`.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Upper bound on `page * page_size`.
///
/// Keeps the offset handed to storage small enough that a client cannot ask
/// for a huge scan (or overflow the offset computation) by paging far ahead.
pub const MAX_RESULT_WINDOW: i64 = 10_000_000;

/// Sortable movie columns. Each may be prefixed with `-` for descending order.
pub const MOVIE_SORT_COLUMNS: &[&str] = &["id", "title", "year", "runtime"];

/// Longest accepted user name, in bytes.
pub const MAX_NAME_BYTES: usize = 500;

/// Password length bounds, in bytes.
pub const MIN_PASSWORD_BYTES: usize = 8;
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Field-keyed validation failures. Only the first message per field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    /// Record `message` against `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Values used when a list parameter is missing or empty.
#[derive(Debug, Clone)]
pub struct ListDefaults {
    pub page: i64,
    pub page_size: i64,
    pub sort: &'static str,
    pub sort_columns: &'static [&'static str],
}

impl Default for ListDefaults {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort: "id",
            sort_columns: MOVIE_SORT_COLUMNS,
        }
    }
}

/// Parse and bounds-check `title`, `genres`, `page`, `page_size` and `sort`.
///
/// `query` is the raw query string without the leading `?`. Unknown
/// parameters are ignored. When a parameter repeats, its first value is used.
pub fn parse_list_query(query: &str, defaults: &ListDefaults) -> Result<ListQuery, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let mut title = None;
    let mut genres = None;
    let mut page = None;
    let mut page_size = None;
    let mut sort = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "title" => &mut title,
            "genres" => &mut genres,
            "page" => &mut page,
            "page_size" => &mut page_size,
            "sort" => &mut sort,
            _ => continue,
        };
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.into_owned());
        }
    }

    let page = read_int(page.as_deref(), defaults.page, "page", &mut errors);
    let page_size = read_int(page_size.as_deref(), defaults.page_size, "page_size", &mut errors);
    let sort = sort.unwrap_or_else(|| defaults.sort.to_string());

    errors.check(page > 0, "page", "must be greater than zero");
    errors.check(page_size > 0, "page_size", "must be greater than zero");
    errors.check(
        page_size <= MAX_PAGE_SIZE,
        "page_size",
        format!("must be a maximum of {MAX_PAGE_SIZE}"),
    );
    if page > 0 && page_size > 0 {
        let within_window = page
            .checked_mul(page_size)
            .is_some_and(|records| records <= MAX_RESULT_WINDOW);
        errors.check(
            within_window,
            "page",
            format!("page * page_size must not exceed {MAX_RESULT_WINDOW}"),
        );
    }
    errors.check(
        is_permitted_sort(&sort, defaults.sort_columns),
        "sort",
        "invalid sort value",
    );

    // A failed conversion lands on its own field, behind any message already there
    let page = to_u32(page, "page", &mut errors);
    let page_size = to_u32(page_size, "page_size", &mut errors);
    let (Some(page), Some(page_size)) = (page, page_size) else {
        return Err(errors);
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ListQuery {
        title: title.unwrap_or_default(),
        genres: genres.as_deref().map(split_csv).unwrap_or_default(),
        page,
        page_size,
        sort,
    })
}

// =============================================================================
// Credential Fields
// =============================================================================

/// A request body whose fields can be checked after decoding.
pub trait Validate {
    /// Record every problem with `self` in `errors`.
    fn validate(&self, errors: &mut ValidationErrors);
}

pub fn validate_name(errors: &mut ValidationErrors, name: &str) {
    errors.check(!name.is_empty(), "name", "must be provided");
    errors.check(
        name.len() <= MAX_NAME_BYTES,
        "name",
        format!("must not be more than {MAX_NAME_BYTES} bytes long"),
    );
}

pub fn validate_email(errors: &mut ValidationErrors, email: &str) {
    errors.check(!email.is_empty(), "email", "must be provided");
    errors.check(email.validate_email(), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(errors: &mut ValidationErrors, password: &str) {
    errors.check(!password.is_empty(), "password", "must be provided");
    errors.check(
        password.len() >= MIN_PASSWORD_BYTES,
        "password",
        format!("must be at least {MIN_PASSWORD_BYTES} bytes long"),
    );
    errors.check(
        password.len() <= MAX_PASSWORD_BYTES,
        "password",
        format!("must not be more than {MAX_PASSWORD_BYTES} bytes long"),
    );
}

pub fn validate_token_plaintext(errors: &mut ValidationErrors, token: &str) {
    errors.check(!token.is_empty(), "token", "must be provided");
    errors.check(
        token.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        format!("must be {TOKEN_PLAINTEXT_LEN} bytes long"),
    );
}

fn read_int(raw: Option<&str>, default: i64, field: &str, errors: &mut ValidationErrors) -> i64 {
    match raw {
        None => default,
        Some(value) => match value.parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                errors.add(field, "must be an integer value");
                default
            }
        },
    }
}

fn to_u32(value: i64, field: &str, errors: &mut ValidationErrors) -> Option<u32> {
    match u32::try_from(value) {
        Ok(n) => Some(n),
        Err(_) => {
            errors.add(field, "out of range");
            None
        }
    }
}

fn is_permitted_sort(sort: &str, columns: &[&str]) -> bool {
    let column = sort.strip_prefix('-').unwrap_or(sort);
    columns.contains(&column)
}

/// Split a comma-separated list, dropping empty entries and duplicates while
/// keeping first-seen order.
fn split_csv(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}
