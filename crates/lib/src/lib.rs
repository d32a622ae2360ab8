//! ntfy to PBX bridge: subscribes to an ntfy topic and, for high-priority alerts, places a
//! call through the Asterisk Manager Interface and/or posts a webhook.

pub mod ami;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod ntfy;
pub mod signal;
pub mod webhook;
