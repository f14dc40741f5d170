//! Fleet control: control plane for a multi-worker task fleet.

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod governance;
pub mod jobs;
pub mod manager;
pub mod routing;
pub mod shutdown;
pub mod store;
pub mod validator;
pub mod watchdog;
pub mod worker;
