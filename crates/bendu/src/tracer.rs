//! VM execution tracing (ambient observability alongside the bytecode VM).
//!
//! Grounded on the teacher's `tracer.rs`: a trait with default no-op hooks,
//! carried as a type parameter on the VM so [`NoopTracer`] monomorphizes to
//! zero overhead in the production path. The teacher has no logging crate
//! anywhere in its workspace (no `log`/`tracing`) — this is its whole
//! observability layer, and Bendu's follows the same shape: a hook per
//! dispatch-loop event the caller might want to observe, selected by
//! generic parameterization of the VM rather than a runtime logger.

use crate::bytecode::op::Opcode;

/// Hook points into the VM's dispatch loop. All methods default to no-ops;
/// implementations override only the ones they use.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each opcode dispatch. The hottest hook — keep
    /// implementations cheap.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a call frame is pushed.
    #[inline(always)]
    fn on_call(&mut self, _func_name: Option<&str>, _depth: usize) {}

    /// Called when a call frame is popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called once per mark-sweep pass, after the sweep has run (spec.md
    /// §4.5 "GC"). Not called for refcount-triggered frees, which are not a
    /// distinct "collection event" — only the stop-the-world sweep is.
    #[inline(always)]
    fn on_gc_sweep(&mut self) {}

    /// Called once a package finishes loading (its init block has run to
    /// completion and its frame is materialized; spec.md §4.4/§4.5,
    /// "Package loading").
    #[inline(always)]
    fn on_package_load(&mut self, _source_id: &str) {}
}

/// The production default: every hook compiles away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Human-readable execution log to stderr, for `bendu dis`/debugging.
#[derive(Debug)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { limit: None, count: 0, stopped: false }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), count: 0, stopped: false }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:?}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        if self.stopped {
            return;
        }
        let name = func_name.unwrap_or("<closure>");
        eprintln!("  >>> CALL {name:<20} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  <<< RETURN              depth={depth}");
    }

    fn on_gc_sweep(&mut self) {
        if self.stopped {
            return;
        }
        eprintln!("  --- GC sweep ---");
    }

    fn on_package_load(&mut self, source_id: &str) {
        if self.stopped {
            return;
        }
        eprintln!("  === loaded package {source_id} ===");
    }
}

/// Counts how many times each opcode dispatches, for `bendu dis`-style
/// hot-path reporting. Grounded on the teacher's sampling-profiler tracer,
/// narrowed to a flat per-opcode count since Bendu has no call-stack
/// sampling infrastructure to hang a richer profile off of.
#[derive(Debug, Clone, Default)]
pub struct ProfilingTracer {
    counts: ahash::AHashMap<Opcode, u64>,
    calls: u64,
    gc_sweeps: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counts(&self) -> &ahash::AHashMap<Opcode, u64> {
        &self.counts
    }

    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls
    }

    #[must_use]
    pub fn total_gc_sweeps(&self) -> u64 {
        self.gc_sweeps
    }
}

impl VmTracer for ProfilingTracer {
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.counts.entry(opcode).or_insert(0) += 1;
    }

    fn on_call(&mut self, _func_name: Option<&str>, _depth: usize) {
        self.calls += 1;
    }

    fn on_gc_sweep(&mut self) {
        self.gc_sweeps += 1;
    }
}

/// Records the set of bytecode offsets actually dispatched during a run,
/// for "did this test exercise every branch" style reporting. Distinct from
/// [`ProfilingTracer`]: coverage cares about *which offsets ran at least
/// once*, not how often.
#[derive(Debug, Clone, Default)]
pub struct CoverageTracer {
    visited: std::collections::BTreeSet<usize>,
}

impl CoverageTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn visited_offsets(&self) -> &std::collections::BTreeSet<usize> {
        &self.visited
    }
}

impl VmTracer for CoverageTracer {
    fn on_instruction(&mut self, ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        self.visited.insert(ip);
    }
}

/// One recorded dispatch-loop event, as captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Instruction { ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize },
    Call { func_name: Option<String>, depth: usize },
    Return { depth: usize },
    GcSweep,
    PackageLoad { source_id: String },
}

/// Captures the full ordered event stream from a run, for snapshot-style
/// assertions in tests that care about exact execution shape rather than
/// just the final value. Unlike [`StderrTracer`] this never prints — the
/// caller inspects [`RecordingTracer::events`] after the run completes.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        self.events.push(TraceEvent::Instruction { ip, opcode, stack_depth, frame_depth });
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        self.events.push(TraceEvent::Call { func_name: func_name.map(str::to_owned), depth });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_gc_sweep(&mut self) {
        self.events.push(TraceEvent::GcSweep);
    }

    fn on_package_load(&mut self, source_id: &str) {
        self.events.push(TraceEvent::PackageLoad { source_id: source_id.to_owned() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_ignores_every_hook() {
        let mut tracer = NoopTracer;
        tracer.on_instruction(0, Opcode::PushUnitLiteral, 0, 1);
        tracer.on_call(Some("f"), 2);
        tracer.on_return(1);
    }

    #[test]
    fn stderr_tracer_stops_after_its_limit() {
        let mut tracer = StderrTracer::with_limit(2);
        tracer.on_instruction(0, Opcode::PushUnitLiteral, 0, 1);
        tracer.on_instruction(1, Opcode::PushUnitLiteral, 1, 1);
        assert!(tracer.stopped);
    }

    #[test]
    fn profiling_tracer_tallies_per_opcode_and_calls() {
        let mut tracer = ProfilingTracer::new();
        tracer.on_instruction(0, Opcode::Dup, 0, 1);
        tracer.on_instruction(1, Opcode::Dup, 1, 1);
        tracer.on_instruction(2, Opcode::Ret, 2, 1);
        tracer.on_call(None, 2);
        tracer.on_gc_sweep();
        assert_eq!(tracer.counts().get(&Opcode::Dup), Some(&2));
        assert_eq!(tracer.counts().get(&Opcode::Ret), Some(&1));
        assert_eq!(tracer.total_calls(), 1);
        assert_eq!(tracer.total_gc_sweeps(), 1);
    }

    #[test]
    fn coverage_tracer_records_each_distinct_offset_once() {
        let mut tracer = CoverageTracer::new();
        tracer.on_instruction(0, Opcode::Dup, 0, 1);
        tracer.on_instruction(0, Opcode::Dup, 0, 1);
        tracer.on_instruction(5, Opcode::Ret, 1, 1);
        assert_eq!(tracer.visited_offsets().len(), 2);
    }

    #[test]
    fn recording_tracer_captures_events_in_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_call(Some("f"), 1);
        tracer.on_gc_sweep();
        tracer.on_package_load("a.bendu");
        assert_eq!(
            tracer.events(),
            &[
                TraceEvent::Call { func_name: Some("f".to_owned()), depth: 1 },
                TraceEvent::GcSweep,
                TraceEvent::PackageLoad { source_id: "a.bendu".to_owned() },
            ]
        );
    }
}
