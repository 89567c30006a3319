// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod schedule;
mod task;
mod validate;

pub use schedule::{schedule_waves, Schedule, ScheduledGroup};
pub use task::{AgentId, ExecMode, ExecutionPlan, ReplanPolicy, RouteDecision, TaskSpec};
pub use validate::{validate_plan, validate_tasks, PlanError};
