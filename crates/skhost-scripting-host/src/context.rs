use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use crate::dispatch::EventRouter;
use crate::error::{ErrorReporter, Phase, ScriptError, panic_message};
use crate::structure::Structure;

/// State handed to a structure while one of its lifecycle callbacks runs
///
/// The phase driver builds a fresh context for each callback, so there is no
/// ambient "current script" that could leak past the call.
pub struct ActivationContext<'a> {
    script: &'a Path,
    structure: &'a str,
    phase: Phase,
    router: &'a mut EventRouter,
}

impl<'a> ActivationContext<'a> {
    pub(crate) fn new(
        router: &'a mut EventRouter,
        script: &'a Path,
        structure: &'a str,
        phase: Phase,
    ) -> Self {
        Self {
            script,
            structure,
            phase,
            router,
        }
    }

    /// Canonical path of the script being activated
    pub fn script(&self) -> &Path {
        self.script
    }

    /// Name of the structure being activated
    pub fn structure(&self) -> &str {
        self.structure
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Event router, for structures that bind triggers
    pub fn router(&mut self) -> &mut EventRouter {
        self.router
    }
}

/// Run one activation callback, reporting failure and rejection
///
/// Returns `true` when the structure survives the phase.
pub(crate) fn activate<F>(
    router: &mut EventRouter,
    reporter: &dyn ErrorReporter,
    script: &Path,
    structure: &mut dyn Structure,
    phase: Phase,
    callback: F,
) -> bool
where
    F: FnOnce(&mut dyn Structure, &mut ActivationContext<'_>) -> anyhow::Result<bool>,
{
    let name = structure.name().to_string();
    let mut ctx = ActivationContext::new(router, script, &name, phase);
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(structure, &mut ctx)));

    let message = match outcome {
        Ok(Ok(true)) => return true,
        Ok(Ok(false)) => "structure rejected".to_string(),
        Ok(Err(e)) => format!("{e:#}"),
        Err(payload) => panic_message(payload.as_ref()),
    };

    reporter.report(&ScriptError::Phase {
        phase,
        script: script.to_path_buf(),
        structure: name,
        message,
    });
    false
}

/// Run one teardown callback; failures are reported and otherwise ignored
pub(crate) fn deactivate<F>(
    router: &mut EventRouter,
    reporter: &dyn ErrorReporter,
    script: &Path,
    structure: &mut dyn Structure,
    phase: Phase,
    callback: F,
) where
    F: FnOnce(&mut dyn Structure, &mut ActivationContext<'_>) -> anyhow::Result<()>,
{
    activate(router, reporter, script, structure, phase, |s, ctx| {
        callback(s, ctx).map(|()| true)
    });
}
