//! Spec and plan documents written during planning.
//!
//! Plans are markdown checklists; the first unchecked `- [ ]` item is what
//! the build phase works on next.

use super::state::ComplexityMode;

/// Spec document file name under the state directory.
pub const SPEC_FILE: &str = "spec.md";
/// Plan document file name under the state directory.
pub const PLAN_FILE: &str = "plan.md";

const OPEN_ITEM: &str = "- [ ] ";

/// The spec document for `prompt`.
#[must_use]
pub fn spec_document(prompt: &str, mode: ComplexityMode) -> String {
    let prompt = prompt.trim();
    match mode {
        ComplexityMode::Fast => format!("# Fast Mode Spec\n\nPrompt: {prompt}\n"),
        ComplexityMode::Streamlined | ComplexityMode::Full => {
            let mut doc = format!(
                "# Spec for: {prompt}\n\n\
                 ## Requirements\n\
                 1. Deliver the behaviour described in the prompt.\n\
                 2. Every generated file is runnable and exits 0 when its checks pass.\n\
                 3. Generated paths stay inside the task workspace.\n\n\
                 ## Constraints\n\
                 - No network access is assumed at test time.\n\
                 - Outputs are committed on an isolated task branch.\n"
            );
            if mode == ComplexityMode::Full {
                doc.push_str(
                    "\n## Verification Gates\n\
                     - Self-test of every runnable file passes.\n\
                     - Project verification command passes.\n\
                     - No repeated output across retries.\n",
                );
            }
            doc
        }
    }
}

/// The plan document for `prompt`.
#[must_use]
pub fn plan_document(prompt: &str, mode: ComplexityMode) -> String {
    let prompt = prompt.trim();
    if mode == ComplexityMode::Fast {
        return format!("# Fast Mode Plan\n\n{OPEN_ITEM}Execute: {prompt}\n");
    }

    let mut plan = format!(
        "# Plan for: {prompt}\n\n\
         ## Phase 1: Execution\n\
         {OPEN_ITEM}Decompose request: {prompt}\n\
         {OPEN_ITEM}Implement atomic component\n\
         {OPEN_ITEM}Verify component via self-test\n\n\
         ## Acceptance Criteria\n\
         {OPEN_ITEM}Self-test reports success.\n"
    );
    if mode == ComplexityMode::Full {
        plan.push_str(&format!("{OPEN_ITEM}Verification gates in spec.md pass.\n"));
    }
    plan
}

/// Text of the first unchecked item in a plan.
#[must_use]
pub fn first_open_item(plan: &str) -> Option<&str> {
    plan.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix(OPEN_ITEM))
        .map(str::trim)
        .filter(|item| !item.is_empty())
}
