//! Transaction propagation: how nested units of work share, create, or
//! savepoint transactions.
//!
//! The "current transaction" association lives on an [`ExecContext`] value
//! threaded through every call (one context per logical call chain, never
//! process-global), so concurrent chains are isolated by construction.
//! Nesting is strictly call-stack-shaped: a unit of work nests by invoking
//! [`run_with_propagation`] again with the context it was handed.

use crate::backend::Connection;
use crate::error::Error;
use async_trait::async_trait;
use std::fmt;

/// Policy governing whether a unit of work joins, requires, or nests a
/// transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Join the existing transaction if present, else create and own one.
    Current,
    /// Require an existing transaction; fail without invoking the unit if
    /// there is none.
    Mandatory,
    /// Nest in a savepoint if a transaction exists, else behave like
    /// `Current`.
    Savepoint,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Propagation::Current => "current",
            Propagation::Mandatory => "mandatory",
            Propagation::Savepoint => "savepoint",
        })
    }
}

/// Execution context for one logical call chain. Owns the chain's
/// connection and the transaction association for its lifetime.
pub struct ExecContext<C: Connection> {
    conn: Option<C>,
    active: bool,
    savepoints: u32,
}

impl<C: Connection> ExecContext<C> {
    pub fn new(conn: C) -> Self {
        ExecContext {
            conn: Some(conn),
            active: false,
            savepoints: 0,
        }
    }

    /// A context with no database reachable from it; every unit of work
    /// submitted fails with a configuration error.
    pub fn detached() -> Self {
        ExecContext {
            conn: None,
            active: false,
            savepoints: 0,
        }
    }

    /// Whether a transaction is currently associated with this chain.
    pub fn in_transaction(&self) -> bool {
        self.active
    }

    /// The chain's connection.
    pub fn conn(&mut self) -> Result<&mut C, Error> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Configuration("no database reachable from context".to_string()))
    }

    fn next_savepoint(&mut self) -> String {
        self.savepoints += 1;
        format!("sp_{}", self.savepoints)
    }
}

/// A caller-defined piece of work executed against the chain's transaction.
/// Implementors carry their own inputs and results; `work` may nest by
/// calling [`run_with_propagation`] with the context it receives.
#[async_trait]
pub trait UnitOfWork<C: Connection>: Send {
    async fn work(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error>;
}

/// Run `unit` under `mode`. The unit's own error is always what the caller
/// sees after the matching control action (commit, rollback, savepoint
/// release or savepoint rollback) has been taken; a failing control action
/// surfaces as [`Error::TransactionControl`], preserving the unit error it
/// would otherwise mask. Failed units are never re-run.
pub async fn run_with_propagation<C, U>(
    ctx: &mut ExecContext<C>,
    mode: Propagation,
    unit: &mut U,
) -> Result<(), Error>
where
    C: Connection,
    U: UnitOfWork<C> + ?Sized,
{
    // The context must reach a database regardless of mode.
    ctx.conn()?;
    match mode {
        Propagation::Mandatory => {
            if !ctx.active {
                return Err(Error::NoActiveTransaction);
            }
            unit.work(ctx).await
        }
        Propagation::Current => {
            if ctx.active {
                unit.work(ctx).await
            } else {
                run_owned(ctx, unit).await
            }
        }
        Propagation::Savepoint => {
            if ctx.active {
                run_savepoint(ctx, unit).await
            } else {
                run_owned(ctx, unit).await
            }
        }
    }
}

/// `Current`-mode shortcut, the common case for CRUD execution.
pub async fn run<C, U>(ctx: &mut ExecContext<C>, unit: &mut U) -> Result<(), Error>
where
    C: Connection,
    U: UnitOfWork<C> + ?Sized,
{
    run_with_propagation(ctx, Propagation::Current, unit).await
}

/// Own a whole transaction: begin, run, commit on success or roll back on
/// failure. The association is cleared before returning either way.
async fn run_owned<C, U>(ctx: &mut ExecContext<C>, unit: &mut U) -> Result<(), Error>
where
    C: Connection,
    U: UnitOfWork<C> + ?Sized,
{
    ctx.conn()?
        .begin()
        .await
        .map_err(|e| Error::control("begin", e, None))?;
    ctx.active = true;
    let outcome = unit.work(ctx).await;
    ctx.active = false;
    match outcome {
        Ok(()) => ctx
            .conn()?
            .commit()
            .await
            .map_err(|e| Error::control("commit", e, None)),
        Err(work_err) => match ctx.conn()?.rollback().await {
            Ok(()) => Err(work_err),
            Err(control_err) => Err(Error::control("rollback", control_err, Some(work_err))),
        },
    }
}

/// Nest inside the active transaction via a savepoint. A failing unit is
/// undone back to the savepoint and its error returned to the nested
/// caller; the outer transaction stays open and unaffected beyond the
/// undone work.
async fn run_savepoint<C, U>(ctx: &mut ExecContext<C>, unit: &mut U) -> Result<(), Error>
where
    C: Connection,
    U: UnitOfWork<C> + ?Sized,
{
    let name = ctx.next_savepoint();
    ctx.conn()?
        .savepoint(&name)
        .await
        .map_err(|e| Error::control("savepoint", e, None))?;
    match unit.work(ctx).await {
        Ok(()) => ctx
            .conn()?
            .release_savepoint(&name)
            .await
            .map_err(|e| Error::control("release savepoint", e, None)),
        Err(work_err) => match ctx.conn()?.rollback_to_savepoint(&name).await {
            Ok(()) => Err(work_err),
            Err(control_err) => Err(Error::control(
                "rollback to savepoint",
                control_err,
                Some(work_err),
            )),
        },
    }
}
