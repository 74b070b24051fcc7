// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Drives one packet reader's ingestion: send the initial `ReadRequest`,
//! then pull `ReadResponse` frames off the channel until end-of-stream,
//! cancellation, or an error — the same three-state shape as
//! `read_states::ReadStates` (`Start` → `ReadWait` → `Finish`), just
//! fed by a `Channel` instead of an iSCSI connection.

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::UfsError,
    packet_reader::PacketQueue,
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
    transport::Channel,
    wire::{Frame, ReadRequest, Status},
};

/// Everything the pump needs to drive one block's ingestion.
pub struct PumpCtx {
    channel: Arc<dyn Channel>,
    block_id: u64,
    offset: u64,
    length: u64,
    lock_id: Option<i64>,
    session_id: Option<i64>,
    queue: Arc<PacketQueue>,
    state: Option<PumpStates>,
}

impl PumpCtx {
    pub fn new(
        channel: Arc<dyn Channel>,
        block_id: u64,
        offset: u64,
        length: u64,
        lock_id: Option<i64>,
        session_id: Option<i64>,
        queue: Arc<PacketQueue>,
    ) -> Self {
        Self {
            channel,
            block_id,
            offset,
            length,
            lock_id,
            session_id,
            queue,
            state: Some(PumpStates::SendRequest(SendRequest)),
        }
    }
}

#[derive(Debug)]
pub struct SendRequest;
#[derive(Debug)]
pub struct Streaming;
#[derive(Debug)]
pub struct Finish;

#[derive(Debug)]
pub enum PumpStates {
    SendRequest(SendRequest),
    Streaming(Streaming),
    Finish(Finish),
}

type PumpStepOut = Transition<PumpStates, Result<()>>;

impl StateMachine<PumpCtx, PumpStepOut> for SendRequest {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PumpStepOut> + Send + 'a>>
    where
        Self: 'a,
        PumpCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut PumpCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            let req = ReadRequest {
                block_id: ctx.block_id,
                offset: ctx.offset as i64,
                length: ctx.length as i64,
                lock_id: ctx.lock_id,
                session_id: ctx.session_id,
            };
            if let Err(e) = ctx.channel.send_read_request(req).await {
                ctx.queue.record_error(UfsError::fatal_io(to_io_error(&e)));
                return Transition::Done(Err(e));
            }
            Transition::Next(PumpStates::Streaming(Streaming), Ok(()))
        })
    }
}

impl StateMachine<PumpCtx, PumpStepOut> for Streaming {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PumpStepOut> + Send + 'a>>
    where
        Self: 'a,
        PumpCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut PumpCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            loop {
                match ctx.channel.recv_frame().await {
                    Ok(Some(Frame::ReadResponse(resp))) if resp.block_id == ctx.block_id => {
                        match resp.status {
                            Status::Success => {
                                let eof = resp.is_eof();
                                ctx.queue.push(resp.payload);
                                if eof {
                                    break;
                                }
                            }
                            Status::Cancelled => {
                                ctx.queue.record_error(UfsError::Cancelled);
                                break;
                            }
                            Status::Error(msg) => {
                                ctx.queue.record_error(UfsError::fatal_io(std::io::Error::other(msg)));
                                break;
                            }
                        }
                    }
                    Ok(Some(_)) => {
                        debug!(block_id = ctx.block_id, "ingestion pump: ignoring frame for another block");
                    }
                    Ok(None) => {
                        // Spontaneous close: not EOF, a connection-reset error.
                        ctx.queue.record_error(UfsError::fatal_io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "channel closed before end-of-stream",
                        )));
                        break;
                    }
                    Err(e) => {
                        ctx.queue.record_error(UfsError::fatal_io(to_io_error(&e)));
                        break;
                    }
                }
            }
            Transition::Next(PumpStates::Finish(Finish), Ok(()))
        })
    }
}

impl StateMachine<PumpCtx, PumpStepOut> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PumpStepOut> + Send + 'a>>
    where
        Self: 'a,
        PumpCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut PumpCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            ctx.queue.mark_finished();
            match ctx.queue.recorded_error() {
                Some(err) => Transition::Done(Err(anyhow!(err))),
                None => Transition::Done(Ok(())),
            }
        })
    }
}

fn to_io_error(e: &anyhow::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

impl StateMachineCtx<PumpCtx, ()> for PumpCtx {
    async fn execute(&mut self, _cancel: &CancellationToken) -> Result<()> {
        debug!(block_id = self.block_id, "ingestion pump starting");
        loop {
            let state = self.state.take().context("state must be set in PumpCtx")?;
            let tr = match state {
                PumpStates::SendRequest(s) => s.step(self).await,
                PumpStates::Streaming(s) => s.step(self).await,
                PumpStates::Finish(s) => s.step(self).await,
            };
            match tr {
                Transition::Next(next, r) => {
                    r?;
                    self.state = Some(next);
                }
                Transition::Stay(r) => {
                    r?;
                }
                Transition::Done(r) => return r,
            }
        }
    }
}
