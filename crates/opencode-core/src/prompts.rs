// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompts per agent role, selected by provider family.

use opencode_config::AgentRole;

/// Fixed instruction appended when summarizing a session.
pub const SUMMARIZE_PROMPT: &str =
    "Provide a detailed but concise summary of our conversation above. \
     Focus on information that would be helpful for continuing the conversation, \
     including what we did, what we're doing, which files we're working on, \
     and what we're going to do next.";

/// Instruction for the one-shot title generation call.
pub const TITLE_PROMPT: &str =
    "Generate a concise title for the following conversation opener. \
     Respond with the title only: one line, at most a few words, no quotes, \
     no punctuation at the end.";

/// Build the system prompt for `role`, flavoured for the provider family.
///
/// Anthropic models respond best to terse, directive prompts; the OpenAI
/// family tolerates a little more structure.  The differences are small and
/// deliberate — keep them that way.
pub fn system_prompt(role: AgentRole, provider: &str) -> String {
    match role {
        AgentRole::Coder => coder_prompt(provider),
        AgentRole::Task => TASK_PROMPT.to_string(),
        AgentRole::Title => TITLE_SYSTEM_PROMPT.to_string(),
        AgentRole::Summarizer => SUMMARIZER_SYSTEM_PROMPT.to_string(),
    }
}

fn coder_prompt(provider: &str) -> String {
    let base = "You are opencode, an agentic coding assistant operating in the user's \
         terminal, inside their workspace.\n\n\
         Work through the available tools, not through guesses: read files before \
         editing them, search before claiming something does not exist, and run \
         commands to verify behavior. Tool calls within a turn run in order, one \
         at a time.\n\n\
         Keep answers short and direct. When you finish a task, state what changed. \
         Never invent file contents or command output.\n\n\
         Mutating tools (edit, write, patch, bash, fetch) require user approval; \
         a denied approval is a final answer, do not retry the same call.";
    match provider {
        "anthropic" | "bedrock" => format!(
            "{base}\n\nUse the minimum number of tool calls that gets the job done; \
             prefer one precise edit over several exploratory ones."
        ),
        _ => format!(
            "{base}\n\n# Workflow\n\
             1. Understand the request; inspect relevant files first.\n\
             2. Make the change with the smallest possible diff.\n\
             3. Verify with diagnostics or a test run when available."
        ),
    }
}

const TASK_PROMPT: &str =
    "You are a focused sub-agent handling one delegated task. You have \
     read-only tools: search and read the workspace, then answer.\n\n\
     Return the answer to the delegating agent directly — no preamble, no \
     questions back. If the task cannot be completed, say exactly what is \
     missing.";

const TITLE_SYSTEM_PROMPT: &str =
    "You title conversations. Reply with a short descriptive title on a \
     single line. No quotes, no trailing punctuation, at most 80 characters.";

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You summarize coding sessions so they can continue in a fresh context \
     window. Preserve: the user's goal, decisions made, files touched (with \
     paths), commands run and their outcomes, and the concrete next steps. \
     Drop pleasantries and dead ends.";

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coder_prompt_varies_by_provider_family() {
        let anthropic = system_prompt(AgentRole::Coder, "anthropic");
        let openai = system_prompt(AgentRole::Coder, "openai");
        assert_ne!(anthropic, openai);
        assert!(anthropic.contains("opencode"));
        assert!(openai.contains("opencode"));
    }

    #[test]
    fn bedrock_uses_the_anthropic_flavour() {
        assert_eq!(
            system_prompt(AgentRole::Coder, "bedrock"),
            system_prompt(AgentRole::Coder, "anthropic")
        );
    }

    #[test]
    fn non_coder_roles_have_fixed_prompts() {
        assert!(system_prompt(AgentRole::Title, "openai").contains("title"));
        assert!(system_prompt(AgentRole::Summarizer, "openai").contains("summarize"));
        assert!(system_prompt(AgentRole::Task, "openai").contains("sub-agent"));
    }
}
