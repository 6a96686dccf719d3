//! config.rs — VM tunables (§4.3 GC trigger policy, §4.8 stack limits).
//!
//! No step-budget/gas concept: PocketLang doesn't bound execution by
//! instruction count (§1 Non-goals).

/// Construction-time knobs for a [`crate::Vm`].
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// GC fill-factor percentage (§4.3: `next_gc = bytes*(100+fill)/100`).
    pub gc_fill_percent: u64,
    /// Hard cap on a fiber's call-frame depth (§4.8 "Call-frame capacity").
    pub max_call_frames: usize,
    /// Hard cap on a fiber's data-stack slot count.
    pub max_stack_slots: usize,
    /// Emit a `tracing` event per dispatched opcode. Expensive; off by
    /// default.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc_fill_percent: pocket_core::gc::DEFAULT_FILL_PERCENT,
            max_call_frames: 512,
            max_stack_slots: 1 << 20,
            trace: false,
        }
    }
}
