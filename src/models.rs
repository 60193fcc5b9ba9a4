use crate::storage::ChannelType;

/// Closed model-to-provider table. Resolution is longest-prefix match on the
/// model string; anything unrecognised falls back to the openai family.
pub struct ModelEntry {
    pub name: &'static str,
    pub types: &'static [ChannelType],
}

const OPENAI_FAMILY: &[ChannelType] = &[ChannelType::Openai, ChannelType::OpenaiCompatible];
const ANTHROPIC: &[ChannelType] = &[ChannelType::Anthropic];
const GEMINI: &[ChannelType] = &[ChannelType::Gemini];

pub const MODEL_TABLE: &[ModelEntry] = &[
    ModelEntry { name: "gpt-4", types: OPENAI_FAMILY },
    ModelEntry { name: "gpt-4-turbo", types: OPENAI_FAMILY },
    ModelEntry { name: "gpt-4o", types: OPENAI_FAMILY },
    ModelEntry { name: "gpt-4o-mini", types: OPENAI_FAMILY },
    ModelEntry { name: "gpt-3.5-turbo", types: OPENAI_FAMILY },
    ModelEntry { name: "o1", types: OPENAI_FAMILY },
    ModelEntry { name: "o1-mini", types: OPENAI_FAMILY },
    ModelEntry { name: "o1-preview", types: OPENAI_FAMILY },
    ModelEntry { name: "claude-3-opus", types: ANTHROPIC },
    ModelEntry { name: "claude-3-sonnet", types: ANTHROPIC },
    ModelEntry { name: "claude-3-haiku", types: ANTHROPIC },
    ModelEntry { name: "claude-3.5-sonnet", types: ANTHROPIC },
    ModelEntry { name: "claude-3-5-sonnet", types: ANTHROPIC },
    ModelEntry { name: "gemini-pro", types: GEMINI },
    ModelEntry { name: "gemini-1.5-pro", types: GEMINI },
    ModelEntry { name: "gemini-1.5-flash", types: GEMINI },
];

pub fn provider_types_for(model: &str) -> &'static [ChannelType] {
    let mut best: Option<&ModelEntry> = None;
    for entry in MODEL_TABLE {
        if model.starts_with(entry.name)
            && best.is_none_or(|b| entry.name.len() > b.name.len())
        {
            best = Some(entry);
        }
    }
    best.map(|e| e.types).unwrap_or(OPENAI_FAMILY)
}
