//! # netcli - Network Device CLI Session Engine
//!
//! `netcli` drives the interactive command line of routers, switches and
//! firewalls over SSH or Telnet the way an operator would: connect, classify
//! the prompt, escalate privilege, move between configuration modes, run
//! commands, and spot in-band error text that the transport cannot tell
//! apart from ordinary output.
//!
//! ## Features
//!
//! - **Vendor Profiles**: Per-family prompt, transition and error tables behind one trait
//! - **Deterministic Resolution**: Identity patterns tried in registration order
//! - **Session Reuse**: One live session per device address, serialized access
//! - **Quiescent Reads**: Deadline-bounded read-until-prompt with error scanning
//! - **Keep-alive**: Idle sessions are probed and rebuilt when they stop answering
//! - **Maximum Compatibility**: Legacy SSH algorithms and plain Telnet
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netcli::config::EngineConfig;
//! use netcli::dispatcher::RequestDispatcher;
//! use netcli::protocol::{Auth, CliRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = RequestDispatcher::with_builtin_profiles(EngineConfig::default())?;
//!
//!     let request = CliRequest {
//!         vendor: "cisco".to_string(),
//!         device_type: "asa".to_string(),
//!         version: "9.8".to_string(),
//!         device: "fw-edge-1".to_string(),
//!         mode: "login_enable".to_string(),
//!         address: "192.168.1.1:22".to_string(),
//!         auth: Auth {
//!             username: "admin".to_string(),
//!             password: "password".to_string(),
//!         },
//!         enable_pwd: Some("secret".to_string()),
//!         commands: vec!["show version".to_string()],
//!         ..Default::default()
//!     };
//!
//!     let response = dispatcher.handle(request).await;
//!     for (command, output) in response.cmds_std.unwrap_or_default() {
//!         println!("{command}:\n{output}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`dispatcher::RequestDispatcher`] - Resolves, acquires, executes and reports
//! - [`registry::ProfileRegistry`] - Maps `vendor.type.version` to a profile
//! - [`device::VendorProfile`] - Capability trait implemented per vendor family
//! - [`session::SessionManager`] - One gate and at most one session per address
//! - [`transport`] - SSH and Telnet shells
//! - [`templates`] - Built-in vendor profiles
//! - [`error::ConnectError`] - Error types and their result codes

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod templates;
pub mod transport;
