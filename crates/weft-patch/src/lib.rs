// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod engine;
mod envelope;
mod merge;
mod pointer;

pub use engine::{apply_patch, apply_patch_in_place, PatchError, PatchOp, PatchOptions};
pub use envelope::{apply_envelope, AppGraph, EnvelopeOptions, EnvelopeOutcome, PatchEnvelope};
pub use merge::{merge_patch_intents, IntentSource, MergeOutcome, MergedPatch, PatchIntent};
pub use pointer::{encode_token, parse_pointer};
