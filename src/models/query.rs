use serde::Serialize;

/// Sort direction derived from the `sort` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Validated list parameters for the movie listing endpoint.
///
/// Only produced by [`crate::validation::parse_list_query`], so every value
/// here is within bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub title: String,
    pub genres: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort: String,
}

impl ListQuery {
    /// Column to sort by, without the descending marker.
    pub fn sort_column(&self) -> &str {
        self.sort.strip_prefix('-').unwrap_or(&self.sort)
    }

    pub fn sort_direction(&self) -> SortDirection {
        if self.sort.starts_with('-') {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Number of records to skip. Cannot overflow: page * page_size is bounded
    /// by the validator.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// Pagination metadata returned alongside a page of results.
///
/// All fields are omitted when the result set is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
}

impl Metadata {
    pub fn calculate(total_records: u64, page: u32, page_size: u32) -> Self {
        if total_records == 0 || page_size == 0 {
            return Self::default();
        }

        Self {
            current_page: Some(page),
            page_size: Some(page_size),
            first_page: Some(1),
            last_page: Some(total_records.div_ceil(u64::from(page_size))),
            total_records: Some(total_records),
        }
    }
}
