// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern-config
//!
//! Configuration for tern device clients.
//!
//! ## Features
//!
//! - **Schema**: credential source, token renewal, retry policy, session
//!   timeouts and logging, all with defaults
//! - **Multi-Format Support**: TOML, YAML and JSON files
//! - **Environment**: `${VAR}` / `${VAR:-default}` placeholders and
//!   `TERN_*` overrides
//! - **Builders**: turn a validated config into an authentication provider
//!   and a retry policy
//!
//! ## Quick Start
//!
//! ```no_run
//! use tern_config::loader::load_config;
//! use tern_core::system_clock;
//!
//! let config = load_config("tern.toml").unwrap();
//! let provider = config.build_provider(system_clock()).unwrap();
//! let policy = config.retry_policy();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{find_config_file, load_config, ConfigFormat, ConfigLoader};
pub use schema::{
    ClientConfig, ConnectionConfig, CredentialSource, LogFormat, LogLevel, LoggingConfig,
    PolicyKind, RetryConfig, X509Config,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
