//! Request handler module
//!
//! Static file engine, the nosniff responder layered over it, and request
//! dispatch.

mod listing;
pub mod path;
pub mod responder;
pub mod router;
pub mod static_files;

// Re-export main entry point
pub use responder::{DefaultFileHandler, FileHandler, NosniffResponder};
pub use router::{handle_request, RequestContext};
pub use static_files::StaticFiles;
