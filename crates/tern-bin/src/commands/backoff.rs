// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `backoff` command.

use std::time::Duration;

use tracing::info;

use tern_config::{ConfigLoader, PolicyKind, RetryConfig};
use tern_core::ExponentialBackoffWithJitter;

use crate::cli::{BackoffArgs, Cli, OutputFormat};
use crate::error::{BinError, BinResult};

/// Delay range for one retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRow {
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Shortest possible delay.
    pub min: Duration,
    /// Longest possible delay.
    pub max: Duration,
}

/// Computes the delay ranges for the first `attempts` retries.
///
/// Empty when the policy never retries.
pub fn schedule(retry: &RetryConfig, attempts: u32, throttled: bool) -> Vec<ScheduleRow> {
    if retry.policy == PolicyKind::NoRetry {
        return Vec::new();
    }

    let policy = ExponentialBackoffWithJitter::new(retry.backoff.clone());
    (1..=attempts)
        .map(|attempt| {
            let (min, max) = policy.delay_bounds(attempt, throttled);
            ScheduleRow { attempt, min, max }
        })
        .collect()
}

/// Executes the `backoff` command.
pub fn backoff(cli: &Cli, args: BackoffArgs) -> BinResult<()> {
    let retry = if cli.config.exists() {
        ConfigLoader::new()
            .load(&cli.config)
            .map_err(|e| BinError::from(e).with_context(format!("loading {}", cli.config.display())))?
            .retry
    } else {
        info!("No configuration at {}, using defaults", cli.config.display());
        RetryConfig::default()
    };

    let normal = schedule(&retry, args.attempts, false);
    let throttled = schedule(&retry, args.attempts, true);

    match args.format {
        OutputFormat::Text => {
            println!("Policy: {}", retry.policy);
            if normal.is_empty() {
                println!("Operations are not retried.");
                return Ok(());
            }
            print_table("Transient errors", &normal);
            println!();
            print_table("Throttled requests", &throttled);
        }
        OutputFormat::Json => {
            let rows = |rows: &[ScheduleRow]| {
                rows.iter()
                    .map(|row| {
                        serde_json::json!({
                            "attempt": row.attempt,
                            "min_ms": row.min.as_millis() as u64,
                            "max_ms": row.max.as_millis() as u64,
                        })
                    })
                    .collect::<Vec<_>>()
            };
            let output = serde_json::json!({
                "policy": retry.policy.to_string(),
                "normal": rows(&normal),
                "throttled": rows(&throttled),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_table(title: &str, rows: &[ScheduleRow]) {
    println!("{}:", title);
    println!("  {:>7}  {:>10}  {:>10}", "attempt", "min", "max");
    for row in rows {
        println!(
            "  {:>7}  {:>10}  {:>10}",
            row.attempt,
            format!("{:?}", row.min),
            format!("{:?}", row.max)
        );
    }
}
