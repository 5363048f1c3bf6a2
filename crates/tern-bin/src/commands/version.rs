// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("tern - hub device client tooling");
    println!();
    println!("Version Information:");
    println!("  tern-bin:     {}", env!("CARGO_PKG_VERSION"));
    println!("  tern-core:    {}", tern_core::VERSION);
    println!("  tern-auth:    {}", tern_auth::VERSION);
    println!("  tern-session: {}", tern_session::VERSION);
    println!("  tern-config:  {}", tern_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
