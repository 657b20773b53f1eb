//! Utility functions shared by the binary and the library.

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
