//! Default prompt templates and the renderer behind the seam.
//!
//! Templates use `{{bead_id}}` / `{{bead_title}}` placeholders. Callers
//! that need richer templating swap the fetch/render seams; the loop
//! only ever sees the rendered string.

use crate::beads_bridge::Bead;
use crate::types::AgentType;

pub const CODER_TEMPLATE: &str = "\
# Task: {{bead_title}}

**Bead:** {{bead_id}}

Work this bead to completion:

1. Read the full context with `bd show {{bead_id}} --json`, including
   dependencies and their status.
2. Implement the change in this checkout. Keep commits small and
   focused.
3. Run the tests covering what you changed and fix what breaks.
4. Commit your work, then close the bead with `bd close {{bead_id}}`.

If you hit a decision only a person can make, do not guess: file a
blocking bead labelled `needs-human` and stop.
";

pub const VERIFIER_TEMPLATE: &str = "\
# Verify: {{bead_title}}

**Bead:** {{bead_id}}

This bead was recently worked. Check the landing:

1. Read `bd show {{bead_id}} --json` and the latest commits on this
   branch.
2. Confirm the implementation matches what the bead asked for and that
   the relevant tests pass.
3. If something is wrong, reopen the bead with a comment describing the
   gap; otherwise leave it closed.
";

/// Built-in template for an agent type.
pub fn default_template(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Coder => CODER_TEMPLATE,
        AgentType::Verifier => VERIFIER_TEMPLATE,
    }
}

/// Fill a template's placeholders from a bead.
pub fn render(template: &str, bead: &Bead) -> String {
    template
        .replace("{{bead_id}}", &bead.id)
        .replace("{{bead_title}}", &bead.title)
}
