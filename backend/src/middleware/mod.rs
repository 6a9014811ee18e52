//! Request middleware.
//!
//! Purpose: define middleware components for request lifecycle concerns such
//! as the request context and shared response headers.

pub mod request_scope;

pub use request_scope::RequestScope;
