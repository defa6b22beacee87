// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How much a frame-to-frame transition has to prove before it is accepted.
///
/// Strict unwinding only follows chains that move towards older (higher) addresses by a plausible
/// amount. Lax unwinding accepts discontiguous frames (e.g. an alternate signal stack) as long as
/// they are readable, trading confidence for a longer trace.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unwinding {
    #[default]
    Strict,
    Lax,
}

impl Unwinding {
    pub fn is_strict(self) -> bool {
        self == Unwinding::Strict
    }
}

impl std::str::FromStr for Unwinding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Unwinding::Strict),
            "lax" => Ok(Unwinding::Lax),
            other => anyhow::bail!("Unknown unwinding mode {other:?}, expected strict or lax"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwindConfiguration {
    // Whether to count the frames that did not fit in the output
    count_dropped_frames: bool,
    // Whether to report the byte size of each frame
    collect_sizes: bool,
    max_depth: usize,
    skip_count: usize,
    unwinding: Unwinding,
}

impl Default for UnwindConfiguration {
    fn default() -> Self {
        Self {
            count_dropped_frames: false,
            collect_sizes: false,
            max_depth: constants::MAX_BACKTRACE_FRAMES,
            skip_count: 0,
            unwinding: Unwinding::Strict,
        }
    }
}

impl UnwindConfiguration {
    pub fn new(
        max_depth: usize,
        skip_count: usize,
        unwinding: Unwinding,
        collect_sizes: bool,
        count_dropped_frames: bool,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(max_depth > 0, "max_depth must be at least 1");
        anyhow::ensure!(
            max_depth <= constants::MAX_UNWIND_DEPTH,
            "max_depth {max_depth} exceeds the limit of {}",
            constants::MAX_UNWIND_DEPTH
        );
        Ok(Self {
            count_dropped_frames,
            collect_sizes,
            max_depth,
            skip_count,
            unwinding,
        })
    }

    /// Walk bounded by a caller's buffer rather than a configured depth.
    pub(crate) fn for_buffer(
        max_depth: usize,
        skip_count: usize,
        unwinding: Unwinding,
        count_dropped_frames: bool,
    ) -> Self {
        Self {
            count_dropped_frames,
            collect_sizes: false,
            max_depth,
            skip_count,
            unwinding,
        }
    }

    /// Applies `DD_STACKWALK_UNWINDING` and `DD_STACKWALK_MAX_DEPTH` on top of this configuration.
    /// Malformed or out of range values are ignored.
    /// Reads the environment: do not call from a signal handler.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(constants::DD_STACKWALK_UNWINDING).ok(),
            std::env::var(constants::DD_STACKWALK_MAX_DEPTH).ok(),
        )
    }

    fn with_overrides(mut self, unwinding: Option<String>, max_depth: Option<String>) -> Self {
        if let Some(s) = unwinding {
            match s.parse() {
                Ok(unwinding) => self.unwinding = unwinding,
                Err(e) => debug!("Ignoring {}: {e}", constants::DD_STACKWALK_UNWINDING),
            }
        }
        if let Some(s) = max_depth {
            match s.trim().parse::<usize>() {
                Ok(v) if v > 0 && v <= constants::MAX_UNWIND_DEPTH => self.max_depth = v,
                _ => debug!(
                    "Ignoring {}={s:?}: expected a depth in 1..={}",
                    constants::DD_STACKWALK_MAX_DEPTH,
                    constants::MAX_UNWIND_DEPTH
                ),
            }
        }
        self
    }

    pub fn count_dropped_frames(&self) -> bool {
        self.count_dropped_frames
    }

    pub fn collect_sizes(&self) -> bool {
        self.collect_sizes
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn skip_count(&self) -> usize {
        self.skip_count
    }

    pub fn unwinding(&self) -> Unwinding {
        self.unwinding
    }

    pub fn set_unwinding(&mut self, unwinding: Unwinding) {
        self.unwinding = unwinding;
    }
}
