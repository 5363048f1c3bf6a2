// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Delegated signing through a local workload endpoint.
//!
//! Modules running under an edge runtime never see their key. Instead the
//! runtime exposes a workload API (a Unix domain socket or a local TCP port)
//! that signs data with the module's key on request.
//!
//! - [`WorkloadClient`] speaks the workload API
//! - [`WorkloadSigner`] adapts it to the [`TokenSigner`](crate::TokenSigner) seam
//! - [`WorkloadAuthenticationProvider`] renews tokens through it

mod client;
mod provider;

pub use client::{WorkloadClient, WorkloadEndpoint, WORKLOAD_API_VERSION};
pub use provider::{env, WorkloadAuthenticationProvider, WorkloadSettings, WorkloadSigner};
