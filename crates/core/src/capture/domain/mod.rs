pub mod capture_backend;
pub mod capture_error;
pub mod source_descriptor;
