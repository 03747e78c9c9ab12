//! Prompt templates for the stage pipeline.
//!
//! Templates are rendered by [`crate::pipeline::StageDefinition::render`].
//! Supported placeholders:
//! - `{previous}`: the immediately preceding stage's output, verbatim
//! - `{previous_offset}`: the preceding stage's offset
//! - `{offset}`: this stage's offset
//! - `{span}`: this stage's offset as a phrase, e.g. `1 year`, `10 years`

/// System prompt for the first generated stage, which reacts to the user's change.
pub const FIRST_STAGE_SYSTEM_PROMPT: &str = "You are an alternate history simulator. Describe the immediate consequences ({span} later) of the user's change. Keep it under 100 words.";

/// User message for the first generated stage.
pub const FIRST_STAGE_USER_TEMPLATE: &str = "The change is: {previous}";

/// System prompt for every later stage.
pub const LATER_STAGE_SYSTEM_PROMPT: &str =
    "Describe the world {span} later based on the previous event. Keep it under 100 words.";

/// User message for every later stage.
pub const LATER_STAGE_USER_TEMPLATE: &str = "Previous event (Year {previous_offset}): {previous}";
