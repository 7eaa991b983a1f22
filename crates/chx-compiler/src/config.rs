//! Compiler configuration.
//!
//! A [`CompilerConfig`] is built once, before any pass runs, and then passed by
//! reference through the pipeline, gradient synthesis and emission. Nothing in
//! the crate reads process-wide flags after construction.

use std::env;

use serde::{Deserialize, Serialize};

use crate::graph::ParamNaming;

const ENV_PREFIX: &str = "CHXC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Raises pass summaries from `debug` to `info`.
    pub compiler_log: bool,
    /// Downgrades inference failures to warnings.
    pub permissive: bool,
    pub skip_inference: bool,
    /// Programs from [`crate::compile`] target [`crate::Device::Cuda`].
    pub use_cuda: bool,
    pub fuse_operations: bool,
    /// Offer fusion candidates to the acceptor registered for `backend_name`.
    pub use_alt_backend: bool,
    pub backend_name: String,
    pub reset_shape: bool,
    pub reset_output_shape: bool,
    pub dump_after_inference: bool,
    pub dump_after_simplification: bool,
    pub dump_after_gradient: bool,
    pub dump_after_fusion: bool,
    pub dump_after_scheduling: bool,
    pub dump_subgraphs: bool,
    pub computation_order: String,
    /// Treat graph inputs whose name starts with `/` as parameters.
    pub legacy_param_names: bool,
    pub simplifier_backend: String,
    pub max_simplify_iters: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            compiler_log: false,
            permissive: false,
            skip_inference: false,
            use_cuda: false,
            fuse_operations: false,
            use_alt_backend: false,
            backend_name: String::new(),
            reset_shape: false,
            reset_output_shape: false,
            dump_after_inference: false,
            dump_after_simplification: false,
            dump_after_gradient: false,
            dump_after_fusion: false,
            dump_after_scheduling: false,
            dump_subgraphs: false,
            computation_order: String::new(),
            legacy_param_names: true,
            simplifier_backend: "chxvm".to_string(),
            max_simplify_iters: 16,
        }
    }
}

impl CompilerConfig {
    /// Defaults overridden by `CHXC_*` environment variables, e.g.
    /// `CHXC_PERMISSIVE=1` or `CHXC_COMPUTATION_ORDER=recompute`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let flags: [(&str, &mut bool); 15] = [
            ("COMPILER_LOG", &mut config.compiler_log),
            ("PERMISSIVE", &mut config.permissive),
            ("SKIP_INFERENCE", &mut config.skip_inference),
            ("USE_CUDA", &mut config.use_cuda),
            ("FUSE_OPERATIONS", &mut config.fuse_operations),
            ("USE_ALT_BACKEND", &mut config.use_alt_backend),
            ("RESET_SHAPE", &mut config.reset_shape),
            ("RESET_OUTPUT_SHAPE", &mut config.reset_output_shape),
            ("DUMP_AFTER_INFERENCE", &mut config.dump_after_inference),
            ("DUMP_AFTER_SIMPLIFICATION", &mut config.dump_after_simplification),
            ("DUMP_AFTER_GRADIENT", &mut config.dump_after_gradient),
            ("DUMP_AFTER_FUSION", &mut config.dump_after_fusion),
            ("DUMP_AFTER_SCHEDULING", &mut config.dump_after_scheduling),
            ("DUMP_SUBGRAPHS", &mut config.dump_subgraphs),
            ("LEGACY_PARAM_NAMES", &mut config.legacy_param_names),
        ];
        for (key, slot) in flags {
            if let Some(value) = env_var(key) {
                *slot = parse_bool(&value);
            }
        }
        let strings: [(&str, &mut String); 3] = [
            ("BACKEND_NAME", &mut config.backend_name),
            ("COMPUTATION_ORDER", &mut config.computation_order),
            ("SIMPLIFIER_BACKEND", &mut config.simplifier_backend),
        ];
        for (key, slot) in strings {
            if let Some(value) = env_var(key) {
                *slot = value.trim().to_string();
            }
        }
        if let Some(value) = env_var("MAX_SIMPLIFY_ITERS") {
            match value.trim().parse::<usize>() {
                Ok(iters) if iters > 0 => config.max_simplify_iters = iters,
                _ => tracing::warn!(value = %value, "ignoring invalid CHXC_MAX_SIMPLIFY_ITERS"),
            }
        }
        config
    }

    pub fn param_naming(&self) -> ParamNaming {
        if self.legacy_param_names {
            ParamNaming::LegacySlashPrefix
        } else {
            ParamNaming::InitializerOnly
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    match env::var(format!("{ENV_PREFIX}{key}")) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}
