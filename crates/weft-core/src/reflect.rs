// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Rule-based quality gate over a finished iteration.
//!
//! Every rule runs and issues accumulate; the score starts at 100 and
//! subtracts a configured penalty per issue severity.  The gate never calls
//! a model: it is a pure function of the plan, the task results, and the
//! generated artifacts, so the iterate/stop decision is reproducible.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use weft_config::ReflectionConfig;
use weft_plan::ExecutionPlan;

use crate::executor::{TaskResult, TaskStatus};

fn prototype_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)原型|prototype").expect("static regex"))
}

fn handler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"onClick|onSubmit|onChange").expect("static regex"))
}

fn form_signal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"onSubmit|required").expect("static regex"))
}

fn scaffold_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^src/(main\.[^/]+|App\.[^/]+|index\.css)$").expect("static regex")
    })
}

/// The closed issue vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    LowInteractionComplexity,
    MissingFormFlow,
    MissingDataSurface,
    PlaceholderContentDetected,
    StandaloneHtmlArtifact,
    ScaffoldOnlyOutput,
    TaskFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionReport {
    pub should_iterate: bool,
    /// 0–100.
    pub score: u32,
    pub issues: Vec<Issue>,
}

impl ReflectionReport {
    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// One generated file as seen by the gate.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub path: String,
    pub content: String,
}

/// Everything the gate looks at.
#[derive(Debug, Clone, Default)]
pub struct ReflectionInput<'a> {
    pub task_results: &'a [TaskResult],
    pub files_generated: usize,
    pub prompt_message: &'a str,
    pub touched_file_paths: &'a [String],
    pub artifacts: &'a [GeneratedArtifact],
    /// Envelope-apply failures from this iteration's waves.  A wave whose
    /// merged content failed to reach the app graph delivered nothing,
    /// even when every task in it reported `Completed`.
    pub apply_failures: &'a [String],
}

/// Evaluate one iteration's output.
///
/// `replan_depth` is how many replans have already happened; once it
/// reaches the plan's `max_replan_depth` the iterate decision is forced to
/// `false` regardless of score.
pub fn evaluate(
    plan: &ExecutionPlan,
    input: &ReflectionInput<'_>,
    cfg: &ReflectionConfig,
    replan_depth: u32,
) -> ReflectionReport {
    let mut issues = Vec::new();

    // 1. Failed tasks are fatal.
    for r in input.task_results {
        if r.status != TaskStatus::Completed {
            issues.push(Issue {
                code: IssueCode::TaskFailed,
                severity: Severity::Fatal,
                detail: format!("task {} ended {:?}", r.task_id, r.status),
            });
        }
    }

    // A wave whose envelope failed to apply is just as fatal: its tasks
    // completed but none of their content reached the app graph.
    for failure in input.apply_failures {
        issues.push(Issue {
            code: IssueCode::TaskFailed,
            severity: Severity::Fatal,
            detail: format!("wave apply failed: {failure}"),
        });
    }

    // 2. A single .html artifact under a prototype prompt is the classic
    //    "static mockup instead of an app" failure.
    if input.artifacts.len() == 1
        && input.artifacts[0].path.ends_with(".html")
        && prototype_re().is_match(input.prompt_message)
    {
        issues.push(Issue {
            code: IssueCode::StandaloneHtmlArtifact,
            severity: Severity::Major,
            detail: format!("only artifact is {}", input.artifacts[0].path),
        });
    }

    // 3. Nothing beyond the entry-point scaffold was produced.
    if input.files_generated < 10
        && !input.touched_file_paths.is_empty()
        && input.touched_file_paths.iter().all(|p| scaffold_path_re().is_match(p))
    {
        issues.push(Issue {
            code: IssueCode::ScaffoldOnlyOutput,
            severity: Severity::Major,
            detail: format!("only scaffold files touched: {:?}", input.touched_file_paths),
        });
    }

    // 4. Form flow.
    let has_form_flow = input
        .artifacts
        .iter()
        .any(|a| a.content.contains("<form") && form_signal_re().is_match(&a.content));
    if !has_form_flow {
        issues.push(Issue {
            code: IssueCode::MissingFormFlow,
            severity: Severity::Major,
            detail: "no artifact contains a form with a submit/required signal".into(),
        });
    }

    // 5. Data surface: a real table (with a header) or a grid component.
    let has_data_surface = input.artifacts.iter().any(|a| {
        (a.content.contains("<table") && a.content.contains("<thead"))
            || a.content.contains(r#"role="grid""#)
            || a.content.contains("DataGrid")
            || a.content.contains("<Table")
    });
    if !has_data_surface {
        issues.push(Issue {
            code: IssueCode::MissingDataSurface,
            severity: Severity::Major,
            detail: "no artifact contains a table or data grid".into(),
        });
    }

    // 6. Interaction density, scaled by output size.
    let handlers: usize =
        input.artifacts.iter().map(|a| handler_re().find_iter(&a.content).count()).sum();
    let required = (input.files_generated / 3).max(2);
    if handlers < required {
        issues.push(Issue {
            code: IssueCode::LowInteractionComplexity,
            severity: Severity::Minor,
            detail: format!("{handlers} interactive handlers, expected at least {required}"),
        });
    }

    // 7. Placeholder phrases.
    for phrase in &cfg.placeholder_phrases {
        if let Some(a) = input.artifacts.iter().find(|a| a.content.contains(phrase.as_str())) {
            issues.push(Issue {
                code: IssueCode::PlaceholderContentDetected,
                severity: Severity::Minor,
                detail: format!("{} contains {phrase:?}", a.path),
            });
            break;
        }
    }

    let penalty: u32 = issues
        .iter()
        .map(|i| match i.severity {
            Severity::Fatal => cfg.penalty_fatal,
            Severity::Major => cfg.penalty_major,
            Severity::Minor => cfg.penalty_minor,
        })
        .sum();
    let score = 100u32.saturating_sub(penalty);

    let mut should_iterate = score < cfg.pass_score;
    if replan_depth >= plan.replan_policy.max_replan_depth {
        should_iterate = false;
    }

    ReflectionReport { should_iterate, score, issues }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
