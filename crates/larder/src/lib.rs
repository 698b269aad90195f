//! Larder - static file server with an in-memory cache and live reload
//!
//! Library exposing the serving pieces for testing and reuse.

pub mod inject;
pub mod live;
pub mod range;
pub mod respond;
pub mod server;
pub mod telemetry;
pub mod web;

pub use respond::{BeforeSend, Composer, Decision, RequestContext, StaticResponse};
pub use web::{router, WebState};
