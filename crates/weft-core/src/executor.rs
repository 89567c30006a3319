// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use weft_config::ExecutorConfig;
use weft_context::{ContextMessage, ContextRole, ContextStore};
use weft_model::{ChatMessage, LlmRequest, ModelClient, ProviderError};
use weft_patch::{merge_patch_intents, MergeOutcome, PatchIntent};
use weft_plan::{ExecutionPlan, Schedule, ScheduledGroup, TaskSpec};

use crate::agents::{emit_file_tool, profile};
use crate::events::{Blackboard, RuntimeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub intents: Vec<PatchIntent>,
    pub error: Option<String>,
}

impl TaskResult {
    fn terminal(task_id: &str, status: TaskStatus, error: Option<String>) -> Self {
        Self { task_id: task_id.to_string(), status, intents: Vec::new(), error }
    }
}

/// One executed wave: the scheduled group, its per-task results, and the
/// merged file intents.
#[derive(Debug, Clone)]
pub struct WaveReport {
    pub group: ScheduledGroup,
    pub results: Vec<TaskResult>,
    pub merge: MergeOutcome,
}

/// Drives a schedule wave by wave: strict sequencing across waves,
/// bounded concurrency within one.
pub struct WaveExecutor {
    client: Arc<dyn ModelClient>,
    cfg: ExecutorConfig,
    board: Arc<Blackboard>,
    store: Arc<Mutex<ContextStore>>,
}

impl WaveExecutor {
    pub fn new(
        client: Arc<dyn ModelClient>,
        cfg: ExecutorConfig,
        board: Arc<Blackboard>,
        store: Arc<Mutex<ContextStore>>,
    ) -> Self {
        Self { client, cfg, board, store }
    }

    /// Execute every wave in order.  Wave *n+1* does not begin until wave
    /// *n* has fully drained and merged.  A task whose dependency did not
    /// complete is cancelled without starting, which propagates through the
    /// downstream transitive closure wave by wave.  After an abort the
    /// remaining waves are marked cancelled without submitting work.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        schedule: &Schedule,
        cancel: &CancellationToken,
    ) -> Vec<WaveReport> {
        let mut statuses: HashMap<String, TaskStatus> = HashMap::new();
        let mut reports = Vec::new();

        for group in &schedule.groups {
            if cancel.is_cancelled() {
                let results: Vec<TaskResult> = group
                    .task_ids
                    .iter()
                    .map(|id| {
                        self.board.publish(
                            plan.task(id).map(|t| t.agent_id),
                            Some(id.as_str()),
                            RuntimeEvent::TaskBlocked { reason: "plan aborted".into() },
                        );
                        TaskResult::terminal(id, TaskStatus::Cancelled, Some("plan aborted".into()))
                    })
                    .collect();
                for r in &results {
                    statuses.insert(r.task_id.clone(), r.status);
                }
                reports.push(WaveReport {
                    group: group.clone(),
                    results,
                    merge: MergeOutcome::default(),
                });
                continue;
            }

            self.board.publish(None, None, RuntimeEvent::WaveStarted { wave: group.wave });

            // Keep the shared context within budget before fanning out:
            // prune bulky tool outputs first, then compact if still over
            // the threshold.
            {
                let mut store = self.store.lock().await;
                let pruned = store.prune();
                if pruned.pruned > 0 {
                    debug!(?pruned, "pruned context before wave");
                }
                if let Some(report) = store.compact() {
                    debug!(?report, "compacted context before wave");
                }
            }

            let results = self.run_wave(plan, group, &statuses, cancel).await;
            for r in &results {
                statuses.insert(r.task_id.clone(), r.status);
            }

            let intents: Vec<PatchIntent> =
                results.iter().flat_map(|r| r.intents.iter().cloned()).collect();
            let merge = merge_patch_intents(&intents);
            for path in &merge.conflicts {
                warn!(wave = group.wave, %path, "concurrent intents merged with conflict");
            }

            self.board.publish(None, None, RuntimeEvent::WaveCompleted { wave: group.wave });
            reports.push(WaveReport { group: group.clone(), results, merge });
        }
        reports
    }

    async fn run_wave(
        &self,
        plan: &ExecutionPlan,
        group: &ScheduledGroup,
        statuses: &HashMap<String, TaskStatus>,
        cancel: &CancellationToken,
    ) -> Vec<TaskResult> {
        let mut results: Vec<TaskResult> = Vec::new();
        let mut runnable: Vec<TaskSpec> = Vec::new();

        for id in &group.task_ids {
            let Some(task) = plan.task(id) else {
                results.push(TaskResult::terminal(
                    id,
                    TaskStatus::Failed,
                    Some("task missing from plan".into()),
                ));
                continue;
            };
            let failed_dep = task
                .dependencies
                .iter()
                .find(|d| statuses.get(d.as_str()) != Some(&TaskStatus::Completed));
            if let Some(dep) = failed_dep {
                let reason = format!("dependency {dep} did not complete");
                self.board.publish(
                    Some(task.agent_id),
                    Some(id.as_str()),
                    RuntimeEvent::TaskBlocked { reason: reason.clone() },
                );
                results.push(TaskResult::terminal(id, TaskStatus::Cancelled, Some(reason)));
            } else {
                runnable.push(task.clone());
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.cfg.parallel_fan_out.max(1)));
        let mut set: JoinSet<TaskResult> = JoinSet::new();
        for task in runnable {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let board = self.board.clone();
            let store = self.store.clone();
            let cfg = self.cfg.clone();
            let wave_id = group.id.clone();
            let user_message = plan.user_message.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_task(client, board, store, cfg, wave_id, user_message, task, cancel).await
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "task join failed");
                }
            }
        }

        // Stable report order: the group's task order, regardless of which
        // task finished first.
        results.sort_by_key(|r| {
            group.task_ids.iter().position(|id| id == &r.task_id).unwrap_or(usize::MAX)
        });
        results
    }
}

enum TaskFailure {
    Cancelled,
    TimedOut,
    Provider(ProviderError),
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    client: Arc<dyn ModelClient>,
    board: Arc<Blackboard>,
    store: Arc<Mutex<ContextStore>>,
    cfg: ExecutorConfig,
    wave_id: String,
    user_message: String,
    task: TaskSpec,
    cancel: CancellationToken,
) -> TaskResult {
    board.publish(Some(task.agent_id), Some(task.id.as_str()), RuntimeEvent::TaskStarted);

    let timeout_ms = if task.timeout_ms == 0 { cfg.default_timeout_ms } else { task.timeout_ms };
    let deadline = Duration::from_millis(timeout_ms);

    let attempts = async {
        let mut attempt = 0u32;
        loop {
            match attempt_once(&client, &store, &wave_id, &user_message, &task, &cancel).await {
                Ok(intents) => return Ok(intents),
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    return Err(TaskFailure::Cancelled)
                }
                Err(e) if attempt < task.retry_limit => {
                    attempt += 1;
                    board.publish(
                        Some(task.agent_id),
                        Some(task.id.as_str()),
                        RuntimeEvent::TaskProgress {
                            detail: format!("attempt {attempt} failed: {e}"),
                        },
                    );
                    let delay =
                        Duration::from_millis(cfg.retry_backoff_base_ms << (attempt - 1).min(8));
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TaskFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(TaskFailure::Provider(e)),
            }
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskFailure::Cancelled),
        attempted = tokio::time::timeout(deadline, attempts) => match attempted {
            Err(_) => Err(TaskFailure::TimedOut),
            Ok(result) => result,
        },
    };

    match outcome {
        Ok(intents) => {
            {
                let mut store = store.lock().await;
                store.push(ContextMessage::assistant(format!(
                    "[{}] task {} emitted {} file(s)",
                    task.agent_id,
                    task.id,
                    intents.len()
                )));
            }
            board.publish(
                Some(task.agent_id),
                Some(task.id.as_str()),
                RuntimeEvent::TaskCompleted { success: true },
            );
            TaskResult { task_id: task.id.clone(), status: TaskStatus::Completed, intents, error: None }
        }
        Err(TaskFailure::Cancelled) => {
            board.publish(
                Some(task.agent_id),
                Some(task.id.as_str()),
                RuntimeEvent::TaskBlocked { reason: "cancelled".into() },
            );
            TaskResult::terminal(&task.id, TaskStatus::Cancelled, Some("cancelled".into()))
        }
        Err(TaskFailure::TimedOut) => {
            board.publish(
                Some(task.agent_id),
                Some(task.id.as_str()),
                RuntimeEvent::TaskCompleted { success: false },
            );
            TaskResult::terminal(
                &task.id,
                TaskStatus::TimedOut,
                Some(format!("timed out after {timeout_ms}ms")),
            )
        }
        Err(TaskFailure::Provider(e)) => {
            board.publish(
                Some(task.agent_id),
                Some(task.id.as_str()),
                RuntimeEvent::TaskCompleted { success: false },
            );
            TaskResult::terminal(&task.id, TaskStatus::Failed, Some(e.to_string()))
        }
    }
}

/// One provider round: assemble context, call the model, translate
/// `emit_file` tool calls into patch intents.
async fn attempt_once(
    client: &Arc<dyn ModelClient>,
    store: &Arc<Mutex<ContextStore>>,
    wave_id: &str,
    user_message: &str,
    task: &TaskSpec,
    cancel: &CancellationToken,
) -> Result<Vec<PatchIntent>, ProviderError> {
    let prof = profile(task.agent_id);

    let mut messages: Vec<ChatMessage> = {
        let store = store.lock().await;
        store.effective_messages().iter().map(|m| context_to_chat(m)).collect()
    };
    let directive = if task.phase.is_empty() {
        format!("{user_message}\n\nCurrent task: {} ({})", task.id, task.agent_id)
    } else {
        format!(
            "{user_message}\n\nCurrent task: {} ({}), phase {}",
            task.id, task.agent_id, task.phase
        )
    };
    messages.push(ChatMessage::user(directive));

    let tools = if prof.emits_files { vec![emit_file_tool()] } else { Vec::new() };
    let request = LlmRequest {
        model: client.model_name().to_string(),
        system_prompt: Some(prof.system_prompt.to_string()),
        messages,
        tools,
        ..LlmRequest::default()
    };

    let response = client.complete(request, cancel.clone()).await?;

    let mut intents = Vec::new();
    for call in &response.tool_calls {
        if call.name != "emit_file" {
            continue;
        }
        let Ok(args) = serde_json::from_str::<serde_json::Value>(&call.arguments) else {
            warn!(task = %task.id, "emit_file arguments are not valid JSON; dropped");
            continue;
        };
        let (Some(path), Some(content)) = (args["path"].as_str(), args["content"].as_str()) else {
            warn!(task = %task.id, "emit_file call missing path/content; dropped");
            continue;
        };
        intents.push(PatchIntent::new(
            Uuid::new_v4().to_string(),
            wave_id,
            &task.id,
            task.agent_id,
            path,
            content,
            Utc::now().timestamp_millis(),
        ));
    }
    Ok(intents)
}

/// Map a stored context message into the provider-neutral chat shape.
/// The model has no separate system role in the message list, so system
/// summaries (from compaction) travel as user context.
fn context_to_chat(m: &ContextMessage) -> ChatMessage {
    match m.role {
        ContextRole::Assistant => ChatMessage::assistant(m.content.clone()),
        ContextRole::System => ChatMessage::user(format!("[context]\n{}", m.content)),
        ContextRole::User | ContextRole::ToolResult => ChatMessage::user(m.content.clone()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
