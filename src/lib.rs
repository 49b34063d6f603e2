pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod federation;
pub mod http;
pub mod openstack;
pub mod secret;
pub mod ui;
