//! Real-time group chat broadcaster: clients connect over a WebSocket,
//! send text or upload images, and every accepted event is durably
//! recorded and fanned out to all connected clients in acceptance order.
//! A newly connected client receives the full transcript before any live
//! event.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod embed;
pub mod files;
pub mod housekeeping;
pub mod model;
pub mod registry;
pub mod store;
