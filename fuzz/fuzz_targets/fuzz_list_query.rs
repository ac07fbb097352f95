//! Fuzz target for list query parsing.
//!
//! Feeds arbitrary query strings to `parse_list_query` and checks that an
//! accepted query is always within the paging bounds.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_list_query -- -max_total_time=60
//! ```

#![no_main]

use greenlight::validation::{
    ListDefaults, MAX_PAGE_SIZE, MAX_RESULT_WINDOW, MOVIE_SORT_COLUMNS, parse_list_query,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(query) = std::str::from_utf8(data) else {
        return;
    };

    match parse_list_query(query, &ListDefaults::default()) {
        Ok(parsed) => {
            let page = i64::from(parsed.page);
            let page_size = i64::from(parsed.page_size);
            assert!(page >= 1);
            assert!((1..=MAX_PAGE_SIZE).contains(&page_size));
            assert!(page * page_size <= MAX_RESULT_WINDOW);
            assert!(MOVIE_SORT_COLUMNS.contains(&parsed.sort_column()));
            assert!(parsed.genres.iter().all(|g| !g.is_empty()));
        }
        Err(errors) => assert!(!errors.is_empty()),
    }
});
