// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This module holds constants and configuration shared between the unwinder components

pub(crate) mod configuration;

#[cfg(not(feature = "benchmarking"))]
pub(crate) mod constants;

#[cfg(feature = "benchmarking")]
pub mod constants;
