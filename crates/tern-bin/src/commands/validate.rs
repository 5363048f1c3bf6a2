// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use tern_config::{ClientConfig, ConfigLoader, CredentialSource, PolicyKind};
use tern_core::ConnectionAuth;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

const REDACTED: &str = "<redacted>";

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = ConfigLoader::new().load(config_path).map_err(|e| {
        BinError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    let (source, identity) = describe_source(&config)?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Credential source: {}", source);
            if let Some(ref identity) = identity {
                println!("  Identity: {}", identity);
            }
            println!(
                "  Token: {}s validity, renewed {}s before expiry",
                config.token.validity_secs, config.token.renewal_margin_secs
            );
            println!("  Retry policy: {}", config.retry.policy);
            println!("  Operation timeout: {:?}", config.session.operation_timeout);
            println!("  Reconnect timeout: {:?}", config.session.reconnect_timeout);
            println!("  Log level: {}", config.logging.level.as_str());

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "credential_source": source,
                    "identity": identity,
                    "token_validity_secs": config.token.validity_secs,
                    "token_renewal_margin_secs": config.token.renewal_margin_secs,
                    "retry_policy": config.retry.policy.to_string(),
                    "operation_timeout_ms": config.session.operation_timeout.as_millis() as u64,
                    "reconnect_timeout_ms": config.session.reconnect_timeout.as_millis() as u64,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(redacted(&config)) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Names the credential source and, where known, the identity it targets.
fn describe_source(config: &ClientConfig) -> BinResult<(&'static str, Option<String>)> {
    Ok(match config.connection.source()? {
        CredentialSource::ConnectionString(_, parsed) => {
            let kind = match parsed.auth {
                ConnectionAuth::SharedAccessKey { .. } => "connection string (shared access key)",
                ConnectionAuth::SharedAccessSignature(_) => "connection string (shared access signature)",
                ConnectionAuth::X509 => "connection string (x509 certificate)",
            };
            (kind, Some(parsed.identity.to_string()))
        }
        CredentialSource::SharedAccessSignature(_) => ("shared access signature", None),
        CredentialSource::EdgeEnvironment => ("edge runtime environment", None),
    })
}

fn collect_warnings(config: &ClientConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.retry.policy == PolicyKind::NoRetry {
        warnings.push("Retry policy is no_retry: lost connections are not re-established".to_string());
    }
    if config.session.reconnect_timeout < config.session.operation_timeout {
        warnings.push(format!(
            "Reconnect timeout ({:?}) is shorter than the operation timeout ({:?})",
            config.session.reconnect_timeout, config.session.operation_timeout
        ));
    }
    if config.connection.shared_access_signature.is_some() {
        warnings.push("A fixed shared access signature cannot be renewed automatically".to_string());
    }

    warnings
}

fn redacted(config: &ClientConfig) -> ClientConfig {
    let mut copy = config.clone();
    if copy.connection.connection_string.is_some() {
        copy.connection.connection_string = Some(REDACTED.to_string());
    }
    if copy.connection.shared_access_signature.is_some() {
        copy.connection.shared_access_signature = Some(REDACTED.to_string());
    }
    if let Some(ref mut x509) = copy.connection.x509 {
        if x509.passphrase.is_some() {
            x509.passphrase = Some(REDACTED.to_string());
        }
    }
    copy
}
