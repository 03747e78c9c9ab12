use crate::config::validate_offsets;
use crate::error::{PipelineError, PipelineResult};
use crate::generation::Message;
use crate::prompts::{
    FIRST_STAGE_SYSTEM_PROMPT, FIRST_STAGE_USER_TEMPLATE, LATER_STAGE_SYSTEM_PROMPT,
    LATER_STAGE_USER_TEMPLATE,
};

/// Name of the user-supplied stage 0.
pub const DIVERGENCE_STAGE: &str = "divergence";

/// System and user message templates for one generated stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

/// One stage of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    /// Stable stage name, e.g. `divergence` or `year-10`.
    pub name: String,
    /// Years after the divergence.
    pub offset: u32,
    /// Prompt for generated stages; `None` for the user-supplied stage 0.
    pub prompt: Option<PromptTemplate>,
}

impl StageDefinition {
    /// The user-supplied stage 0
    pub fn divergence() -> Self {
        Self {
            name: DIVERGENCE_STAGE.to_string(),
            offset: 0,
            prompt: None,
        }
    }

    /// A generated stage at `offset` years
    pub fn generated(offset: u32, prompt: PromptTemplate) -> Self {
        Self {
            name: format!("year-{}", offset),
            offset,
            prompt: Some(prompt),
        }
    }

    /// Build the messages for this stage from the immediately preceding
    /// stage's offset and output. `None` for the user-supplied stage.
    pub fn render(&self, previous_offset: u32, previous: &str) -> Option<Vec<Message>> {
        let prompt = self.prompt.as_ref()?;
        Some(vec![
            Message::system(fill(&prompt.system, self.offset, previous_offset, previous)),
            Message::user(fill(&prompt.user, self.offset, previous_offset, previous)),
        ])
    }
}

fn span(offset: u32) -> String {
    if offset == 1 {
        "1 year".to_string()
    } else {
        format!("{} years", offset)
    }
}

// `{previous}` goes last so placeholder-like text inside it stays verbatim.
fn fill(template: &str, offset: u32, previous_offset: u32, previous: &str) -> String {
    template
        .replace("{offset}", &offset.to_string())
        .replace("{previous_offset}", &previous_offset.to_string())
        .replace("{span}", &span(offset))
        .replace("{previous}", previous)
}

/// Ordered, validated stage list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Build a definition from explicit stages.
    ///
    /// Stage 0 must be the prompt-less divergence at offset 0; every later
    /// stage needs a prompt; offsets strictly increase; names are unique.
    pub fn new(stages: Vec<StageDefinition>) -> PipelineResult<Self> {
        let invalid = |message: String| Err(PipelineError::InvalidDefinition { message });

        let offsets: Vec<u32> = stages.iter().map(|s| s.offset).collect();
        if let Err(message) = validate_offsets(&offsets) {
            return invalid(message);
        }

        for (index, stage) in stages.iter().enumerate() {
            match (index, &stage.prompt) {
                (0, Some(_)) => return invalid("stage 0 must not have a prompt".to_string()),
                (i, None) if i > 0 => {
                    return invalid(format!("stage {} ({}) needs a prompt", i, stage.name));
                }
                _ => {}
            }
            if stages[..index].iter().any(|s| s.name == stage.name) {
                return invalid(format!("duplicate stage name: {}", stage.name));
            }
        }

        Ok(Self { stages })
    }

    /// Build the default prompts for an offset list such as `[0, 1, 10, 100]`.
    pub fn from_offsets(offsets: &[u32]) -> PipelineResult<Self> {
        let stages = offsets
            .iter()
            .enumerate()
            .map(|(index, &offset)| match index {
                0 => StageDefinition::divergence(),
                1 => StageDefinition::generated(
                    offset,
                    PromptTemplate {
                        system: FIRST_STAGE_SYSTEM_PROMPT.to_string(),
                        user: FIRST_STAGE_USER_TEMPLATE.to_string(),
                    },
                ),
                _ => StageDefinition::generated(
                    offset,
                    PromptTemplate {
                        system: LATER_STAGE_SYSTEM_PROMPT.to_string(),
                        user: LATER_STAGE_USER_TEMPLATE.to_string(),
                    },
                ),
            })
            .collect();

        Self::new(stages)
    }

    /// All stages in execution order
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Stage at `index`
    pub fn stage(&self, index: usize) -> Option<&StageDefinition> {
        self.stages.get(index)
    }

    /// Number of stages, including stage 0
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a validated definition
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MessageRole;

    #[test]
    fn test_from_offsets_names_and_prompts() {
        let def = PipelineDefinition::from_offsets(&[0, 1, 10, 50, 100, 250]).unwrap();
        let names: Vec<&str> = def.stages().iter().map(|s| s.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["divergence", "year-1", "year-10", "year-50", "year-100", "year-250"]
        );
        assert!(def.stage(0).unwrap().prompt.is_none());
        assert!(def.stages()[1..].iter().all(|s| s.prompt.is_some()));
        assert_eq!(def.len(), 6);
    }

    #[test]
    fn test_first_generated_stage_prompt() {
        let def = PipelineDefinition::from_offsets(&[0, 1, 10]).unwrap();
        let messages = def.stage(1).unwrap().render(0, "Rome never falls").unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("(1 year later)"));
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[1].content, "The change is: Rome never falls");
    }

    #[test]
    fn test_later_stage_embeds_previous_verbatim() {
        let def = PipelineDefinition::from_offsets(&[0, 1, 10]).unwrap();
        let previous = "Senate votes {offset} times";
        let messages = def.stage(2).unwrap().render(1, previous).unwrap();

        assert!(messages[0].content.contains("10 years later"));
        assert_eq!(
            messages[1].content,
            "Previous event (Year 1): Senate votes {offset} times"
        );
    }

    #[test]
    fn test_divergence_stage_does_not_render() {
        assert!(StageDefinition::divergence().render(0, "x").is_none());
    }

    #[test]
    fn test_rejects_bad_offsets() {
        assert!(PipelineDefinition::from_offsets(&[]).is_err());
        assert!(PipelineDefinition::from_offsets(&[1, 10]).is_err());
        assert!(PipelineDefinition::from_offsets(&[0, 10, 10]).is_err());
    }

    #[test]
    fn test_rejects_misplaced_prompts() {
        let prompt = PromptTemplate {
            system: "s".to_string(),
            user: "u".to_string(),
        };

        let mut first = StageDefinition::divergence();
        first.prompt = Some(prompt.clone());
        assert!(PipelineDefinition::new(vec![first]).is_err());

        let mut second = StageDefinition::generated(1, prompt);
        second.prompt = None;
        assert!(PipelineDefinition::new(vec![StageDefinition::divergence(), second]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let prompt = PromptTemplate {
            system: "s".to_string(),
            user: "u".to_string(),
        };
        let mut b = StageDefinition::generated(2, prompt.clone());
        b.name = "year-1".to_string();

        let result = PipelineDefinition::new(vec![
            StageDefinition::divergence(),
            StageDefinition::generated(1, prompt),
            b,
        ]);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_single_stage_definition() {
        let def = PipelineDefinition::from_offsets(&[0]).unwrap();
        assert_eq!(def.len(), 1);
        assert!(!def.is_empty());
    }
}
