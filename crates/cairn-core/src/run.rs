//! The run controller: one run from tree to tally line

use crate::error::RunError;
use crate::event::{Event, EventBus, Notifier};
use crate::options::RunOptions;
use crate::registry::SourceRegistry;
use crate::reporter::{tally_line, ErrorCollector, Output, ProgressRenderer};
use crate::sequencer::Sequencer;
use crate::suite::{build_root, TestSuite};
use crate::trap::ErrorTrap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Running counts of one run
#[derive(Debug, Default)]
pub struct Tally {
    total: AtomicUsize,
    errors: AtomicUsize,
}

impl Tally {
    /// Test ends count toward the total; run-level errors only toward errors
    pub fn record(&self, event: &Event) {
        match event {
            Event::TestEnd { error, .. } => {
                self.total.fetch_add(1, Ordering::SeqCst);
                if error.is_some() {
                    self.errors.fetch_add(1, Ordering::SeqCst);
                }
            }
            Event::Uncaught { .. } => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub errors: usize,
}

impl RunSummary {
    /// Process exit status for this run
    pub fn exit_code(&self) -> u8 {
        self.errors.min(u8::MAX as usize) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

/// Exit-status hooks consulted when the process ends
///
/// The newest hook decides the status. Each run replaces its previous hook,
/// so repeated watch cycles never accumulate them.
#[derive(Debug, Clone, Default)]
pub struct ExitHooks {
    hooks: Arc<Mutex<Vec<(HookId, u8)>>>,
    next: Arc<AtomicUsize>,
}

impl ExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: u8) -> HookId {
        let id = HookId(self.next.fetch_add(1, Ordering::SeqCst) as u64);
        self.hooks.lock().push((id, code));
        id
    }

    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook, _)| *hook != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exit_code(&self) -> u8 {
        self.hooks.lock().last().map(|(_, code)| *code).unwrap_or(0)
    }
}

/// Drives runs end to end and owns the loaded-source registry between them
pub struct RunController {
    registry: SourceRegistry,
    options: Arc<RunOptions>,
    output: Output,
    exit_hooks: ExitHooks,
    exit_hook: Option<HookId>,
}

impl RunController {
    pub fn new(options: RunOptions, output: Output) -> Self {
        Self {
            registry: SourceRegistry::default(),
            options: Arc::new(options),
            output,
            exit_hooks: ExitHooks::new(),
            exit_hook: None,
        }
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_exit_hooks(mut self, hooks: ExitHooks) -> Self {
        self.exit_hooks = hooks;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    pub fn exit_hooks(&self) -> &ExitHooks {
        &self.exit_hooks
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Build the tree for `paths` and run it
    pub async fn run(&mut self, paths: &[PathBuf]) -> Result<RunSummary, RunError> {
        let mut root = build_root(paths, &mut self.registry)?;
        self.run_suite(&mut root).await
    }

    /// Run an already-built tree
    pub async fn run_suite(&mut self, root: &mut TestSuite) -> Result<RunSummary, RunError> {
        let bus = Arc::new(EventBus::new());
        let progress = bus.subscribe(ProgressRenderer::new(self.output.clone()));
        let collector = bus.subscribe(ErrorCollector::new());

        let tally = Arc::new(Tally::default());
        let notify: Notifier = {
            let bus = Arc::clone(&bus);
            let tally = Arc::clone(&tally);
            Arc::new(move |event: Event| {
                tally.record(&event);
                bus.publish(event);
            })
        };

        let trap = ErrorTrap::arm(Arc::clone(&notify));
        let sequencer = Sequencer::new(notify, Arc::clone(&self.options)).with_trap(trap.clone());
        sequencer.run(root).await;
        // Late failures of timed-out tests still belong to this run.
        sequencer.settle_orphans(self.options.orphan_grace()).await;
        trap.disarm();
        bus.close();

        progress.await.map_err(|e| RunError::Pipeline(e.to_string()))??;
        let collector = collector
            .await
            .map_err(|e| RunError::Pipeline(e.to_string()))??;

        let summary = RunSummary {
            total: tally.total(),
            errors: tally.errors(),
        };
        self.output.write_str(&format!(
            "\n{}{}\n",
            collector.render(),
            tally_line(summary.total, summary.errors)
        ))?;

        if let Some(previous) = self.exit_hook.take() {
            self.exit_hooks.remove(previous);
        }
        self.exit_hook = Some(self.exit_hooks.register(summary.exit_code()));
        debug!(total = summary.total, errors = summary.errors, "run finished");

        Ok(summary)
    }
}
