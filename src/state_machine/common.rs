// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Outcome of a single state's `step`: advance to a new state, stay put
/// (used for intra-state retries), or finish.
pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

/// One state in a typestate state machine driven by [`StateMachineCtx`].
pub trait StateMachine<Ctx, RespCtx>: Sized {
    type StepResult<'a>: Future<Output = RespCtx> + Send + 'a
    where
        Self: 'a,
        RespCtx: 'a,
        Ctx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

/// Drives a state machine to completion, owning the current-state slot.
pub trait StateMachineCtx<Ctx, Outcome> {
    async fn execute(&mut self, cancel: &CancellationToken) -> anyhow::Result<Outcome>;
}
