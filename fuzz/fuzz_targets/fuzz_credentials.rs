//! Fuzz target for credential and client address parsing.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_credentials -- -max_total_time=60
//! ```

#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use greenlight::middleware::CidrRange;
use greenlight::models::{TOKEN_PLAINTEXT_LEN, is_token_shaped, token_digest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if is_token_shaped(input) {
        assert_eq!(input.len(), TOKEN_PLAINTEXT_LEN);
        let _ = token_digest(input);
    }

    if let Some(range) = CidrRange::parse(input) {
        let _ = range.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
});
