//! Static file server that marks every response `X-Content-Type-Options: nosniff`
//! and serves `.js` files as `application/javascript`.

pub mod config;
pub mod handler;
pub mod http;
pub mod logger;
pub mod server;
