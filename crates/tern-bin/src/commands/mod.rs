// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod backoff;
mod sas;
mod validate;
mod version;

pub use backoff::{backoff, schedule, ScheduleRow};
pub use sas::{generate, inspect, sign_token};
pub use validate::validate;
pub use version::version;

use crate::cli::{Cli, Commands, SasCommand};
use crate::error::BinResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.command.clone() {
        Commands::Sas(SasCommand::Generate(args)) => sas::generate(&cli, args).await,
        Commands::Sas(SasCommand::Inspect(args)) => sas::inspect(args),
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Backoff(args) => backoff::backoff(&cli, args),
        Commands::Version => version::version(&cli),
    }
}
