pub mod handlers;

// Re-export commonly used helpers for convenience
pub use handlers::{
    build_fetcher, integration_mode, load_urls_from_file, load_urls_from_source,
    parse_header_arg, parse_url_line,
};
