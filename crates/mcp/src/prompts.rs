//! Static prompt templates exposed over `prompts/list` and `prompts/get`.
use crate::types::PromptDef;

pub struct Prompt {
    pub name: &'static str,
    pub description: &'static str,
    pub text: &'static str,
}

pub const PROMPTS: &[Prompt] = &[
    Prompt {
        name: "remember_conversation",
        description: "Store the important points of the current conversation in memory",
        text: "Summarize the key decisions, facts and open questions from this \
conversation, then store them in memory: durable knowledge as concept files, \
project state as project files, and the conversation summary as a conversation \
file. Update main.md goals and tasks where the conversation changed them.",
    },
    Prompt {
        name: "recall_context",
        description: "Recall stored context relevant to the current topic",
        text: "Search memory for notes relevant to the current topic using the \
search tool (hybrid mode). Read main.md first for active goals and tasks, then \
pull in the most relevant files before answering.",
    },
    Prompt {
        name: "memory_usage_guide",
        description: "How to structure and maintain this memory",
        text: "Memory is a tree of markdown files grouped by category: projects, \
concepts, conversations, preferences and other. main.md tracks current goals, \
active tasks, plans and an index of all files. Keep files focused on one topic, \
use headers for structure (search preserves header context), and tag files for \
filtered retrieval.",
    },
    Prompt {
        name: "active_memory_usage",
        description: "Proactively maintain memory during a conversation",
        text: "While working, record new durable facts as soon as they appear: \
add goals and tasks to main.md when they are agreed, mark them complete when \
done, and append notable events to Recent Updates. Prefer editing existing \
files over creating near-duplicates.",
    },
];

#[must_use]
pub fn list() -> Vec<PromptDef> {
    PROMPTS
        .iter()
        .map(|p| PromptDef {
            name: p.name.to_string(),
            description: Some(p.description.to_string()),
        })
        .collect()
}

#[must_use]
pub fn get(name: &str) -> Option<&'static Prompt> {
    PROMPTS.iter().find(|p| p.name == name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn all_four_templates_present() {
        let names: Vec<&str> = PROMPTS.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "remember_conversation",
                "recall_context",
                "memory_usage_guide",
                "active_memory_usage"
            ]
        );
        assert!(get("recall_context").is_some());
        assert!(get("nope").is_none());
    }
}
