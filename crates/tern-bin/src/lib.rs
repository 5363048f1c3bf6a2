// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern-bin
//!
//! Command-line tooling for tern device clients.
//!
//! ## Architecture
//!
//! ```text
//!            main.rs
//!               │
//!         ┌─────▼─────┐
//!         │  cli.rs   │
//!         └─────┬─────┘
//!        ┌──────┴──────┐
//!        ▼             ▼
//!   ┌──────────┐  ┌──────────┐
//!   │ commands │  │ logging  │
//!   └────┬─────┘  └──────────┘
//!        │
//!   ┌────▼─────┐
//!   │  tern-*  │
//!   └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Sign a token from a connection string
//! tern sas generate --connection-string "HostName=...;DeviceId=...;SharedAccessKey=..." --ttl 600
//!
//! # Decode a token
//! tern sas inspect "SharedAccessSignature sr=...&sig=...&se=..."
//!
//! # Validate configuration
//! tern -c tern.toml validate
//!
//! # Preview the retry delays
//! tern backoff --attempts 6
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
