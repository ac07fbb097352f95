use serde::Serialize;

/// A catalogue entry returned by the movie endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub year: i32,
    /// Running time in minutes
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}
