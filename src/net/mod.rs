//! Network layer subsystem.
//!
//! Plain TCP listeners are bound directly in `main` and handed to
//! `HttpServer::run`. When the listener config carries a `tls` section the
//! certificate pair is loaded here and served through `axum-server`.

pub mod tls;

pub use tls::load_tls_config;
