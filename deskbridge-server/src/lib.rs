//! # deskbridge-server
//!
//! HTTP/WebSocket front end for the protocol bridge. Loads a TOML
//! configuration, builds one shared [`deskbridge_core::Bridge`] and
//! serves:
//!
//! - **WebSocket**: structured sessions (`/ws/{id}`, `/ws?sessionId=`)
//!   and raw RFB passthrough (`/vnc/{id}/websocket`)
//! - **Actions**: one-shot `POST /sessions/{id}/{action}` endpoints
//! - **Admin**: endpoint cache stats and invalidation, health

pub mod app;
pub mod config;
pub mod routes;
pub mod ws;
