// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `sas` commands.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::debug;

use tern_auth::{AuthenticationProvider, SharedAccessKeyAuthenticationProvider, TokenRenewal};
use tern_config::ConfigLoader;
use tern_core::{system_clock, Clock, SharedAccessSignature};

use crate::cli::{Cli, OutputFormat, SasGenerateArgs, SasInspectArgs};
use crate::error::{BinError, BinResult};

/// Executes `sas generate`.
pub async fn generate(cli: &Cli, args: SasGenerateArgs) -> BinResult<()> {
    let connection_string = match args.connection_string {
        Some(connection_string) => connection_string,
        None => {
            let config = ConfigLoader::new()
                .load(&cli.config)
                .map_err(|e| BinError::from(e).with_context(format!("loading {}", cli.config.display())))?;
            config
                .connection
                .connection_string
                .ok_or_else(|| BinError::config("the configuration has no connection_string"))?
        }
    };

    let token = sign_token(&connection_string, args.ttl, system_clock()).await?;
    println!("{}", token);
    Ok(())
}

/// Signs one token valid for `ttl` seconds with the key-derived provider.
pub async fn sign_token(connection_string: &str, ttl: u64, clock: Arc<dyn Clock>) -> BinResult<String> {
    if ttl == 0 {
        return Err(BinError::argument("--ttl must be greater than zero"));
    }

    let renewal = TokenRenewal::new(ttl, ttl / 4)?;
    let provider =
        SharedAccessKeyAuthenticationProvider::from_connection_string_with(connection_string, renewal, clock)?;

    let credential = provider.get_credential().await;
    provider.stop();
    let credential = credential?;

    debug!(identity = %credential.identity, expiry = ?credential.expiry(), "Token signed");
    credential
        .token()
        .ok_or_else(|| BinError::config("the provider did not return a token"))
}

/// Executes `sas inspect`.
pub fn inspect(args: SasInspectArgs) -> BinResult<()> {
    let token = SharedAccessSignature::parse(&args.token)?;
    let now = system_clock().now_epoch_secs();
    let resource = token.resource_uri()?;
    let expires_at = Utc
        .timestamp_opt(token.se.min(i64::MAX as u64) as i64, 0)
        .single()
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "(out of range)".to_string());

    match args.format {
        OutputFormat::Text => {
            println!("Resource:   {}", resource);
            println!("Key name:   {}", token.skn.as_deref().unwrap_or("(none)"));
            println!("Expires:    {} ({})", expires_at, token.se);
            if token.is_expired(now) {
                println!("Status:     expired");
            } else {
                println!("Status:     valid for {}s", token.remaining_secs(now));
            }
            for (name, value) in &token.extra {
                println!("Extra:      {}={}", name, value);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "resource_uri": resource,
                "key_name": token.skn,
                "expiry": token.se,
                "expires_at": expires_at,
                "expired": token.is_expired(now),
                "remaining_secs": token.remaining_secs(now),
                "extra": token.extra,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_epoch_secs(&self) -> u64 {
            self.0
        }
    }

    const CS: &str = "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=a2V5";

    #[tokio::test]
    async fn test_sign_token_matches_local_signature() {
        let token = sign_token(CS, 600, Arc::new(FixedClock(1000))).await.unwrap();
        let expected =
            SharedAccessSignature::create("hub.example.net/devices/dev-1", None, "a2V5", 1600).unwrap();
        assert_eq!(token, expected.to_string());
    }

    #[tokio::test]
    async fn test_sign_token_rejects_zero_ttl() {
        let err = sign_token(CS, 0, Arc::new(FixedClock(0))).await.unwrap_err();
        assert!(matches!(err, BinError::Argument(_)));
    }

    #[tokio::test]
    async fn test_sign_token_needs_a_key() {
        let err = sign_token("HostName=h;DeviceId=d;x509=true", 600, Arc::new(FixedClock(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BinError::Hub(_)));
    }
}
