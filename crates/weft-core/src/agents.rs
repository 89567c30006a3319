// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static profiles for the closed agent set.
//!
//! Dispatch is a match on [`AgentId`], not a string-keyed registry: adding
//! an agent means adding an enum variant and a profile, and the compiler
//! flags every site that must learn about it.

use serde_json::json;

use weft_model::ToolSchema;
use weft_plan::AgentId;

/// Behavioural profile of one agent kind.
#[derive(Debug, Clone, Copy)]
pub struct AgentProfile {
    pub id: AgentId,
    pub display_name: &'static str,
    /// Seed system prompt.  The executor appends the task directive and the
    /// selected context sections.
    pub system_prompt: &'static str,
    /// Whether this agent is expected to emit file intents (analysis agents
    /// produce text/decisions instead).
    pub emits_files: bool,
}

static PROFILES: &[AgentProfile] = &[
    AgentProfile {
        id: AgentId::Scaffold,
        display_name: "Scaffold",
        system_prompt: "You scaffold project structure: entry points, routing, and build wiring. \
                        Emit each file with the emit_file tool.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Page,
        display_name: "Page",
        system_prompt: "You build complete page components with realistic content and layout. \
                        Emit each file with the emit_file tool.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Interaction,
        display_name: "Interaction",
        system_prompt: "You add interactive behaviour: handlers, forms, validation, and feedback. \
                        Emit each file with the emit_file tool.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::State,
        display_name: "State",
        system_prompt: "You design client state: stores, data flow, and derived values. \
                        Emit each file with the emit_file tool.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Style,
        display_name: "Style",
        system_prompt: "You apply the visual system: tokens, spacing, and responsive styles. \
                        Emit each file with the emit_file tool.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Quality,
        display_name: "Quality",
        system_prompt: "You review generated output for gaps and emit corrected files where needed.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Repair,
        display_name: "Repair",
        system_prompt: "You fix the specific defects listed in the task directive. \
                        Emit only the files you change.",
        emits_files: true,
    },
    AgentProfile {
        id: AgentId::Planner,
        display_name: "Planner",
        system_prompt: "You decompose the request into a concrete task plan.",
        emits_files: false,
    },
    AgentProfile {
        id: AgentId::Architect,
        display_name: "Architect",
        system_prompt: "You decide module boundaries, data contracts, and the routing map.",
        emits_files: false,
    },
    AgentProfile {
        id: AgentId::Research,
        display_name: "Research",
        system_prompt: "You gather the domain facts and reference patterns the other agents need.",
        emits_files: false,
    },
];

/// Profile lookup; total over the closed enum.
pub fn profile(id: AgentId) -> &'static AgentProfile {
    PROFILES
        .iter()
        .find(|p| p.id == id)
        .expect("every AgentId variant has a profile")
}

/// The tool through which generation agents propose file edits.
pub fn emit_file_tool() -> ToolSchema {
    ToolSchema {
        name: "emit_file".into(),
        description: "Propose the full content of one generated file".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative file path, e.g. src/App.tsx"
                },
                "content": {
                    "type": "string",
                    "description": "Complete file content"
                }
            },
            "required": ["path", "content"]
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
