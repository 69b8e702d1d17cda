// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics: leveled logging with an embedder-provided sink.

pub mod log;
