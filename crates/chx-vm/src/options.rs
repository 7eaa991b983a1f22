use std::path::PathBuf;

use crate::CustomOpRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TraceLevel {
    #[default]
    Off,
    Trace,
    Verbose,
}

impl TraceLevel {
    /// `verbose` wins over `trace`.
    pub fn from_flags(trace: bool, verbose: bool) -> Self {
        if verbose {
            TraceLevel::Verbose
        } else if trace {
            TraceLevel::Trace
        } else {
            TraceLevel::Off
        }
    }

    pub fn is_enabled(self) -> bool {
        self != TraceLevel::Off
    }
}

/// Per-run switches handed to an [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub trace_level: TraceLevel,
    pub training: bool,
    pub check_nans: bool,
    pub check_infs: bool,
    pub check_types: bool,
    pub dump_memory_usage: bool,
    /// Destination for a Chrome trace-event file, when requested.
    pub chrome_tracing: Option<PathBuf>,
    pub custom_ops: CustomOpRegistry,
}

impl RunOptions {
    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    pub fn with_custom_ops(mut self, registry: CustomOpRegistry) -> Self {
        self.custom_ops = registry;
        self
    }

    pub fn training(mut self, training: bool) -> Self {
        self.training = training;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_implies_tracing() {
        assert_eq!(TraceLevel::from_flags(false, false), TraceLevel::Off);
        assert_eq!(TraceLevel::from_flags(true, false), TraceLevel::Trace);
        assert_eq!(TraceLevel::from_flags(false, true), TraceLevel::Verbose);
        assert_eq!(TraceLevel::from_flags(true, true), TraceLevel::Verbose);
        assert!(TraceLevel::Trace.is_enabled());
    }
}
