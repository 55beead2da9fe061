//! HTTP surface and platform adapters for `callsync`.

pub mod bootstrap;
pub mod health;
pub mod oauth;
pub mod platform;
pub mod webhook;
