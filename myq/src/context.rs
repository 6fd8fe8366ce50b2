use futures_core::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{Connection, Error, Pool, Result, Transaction, TxnOptions};

/// Carries the cooperative cancellation signal through storage calls.
///
/// Cancellation is observed at await points: an in-flight query picks it up
/// at its next `ready()`/`next()`/`close()` suspension and propagates it to
/// the wire. There is no intrinsic timeout; compose one by cancelling a
/// child context from a timer.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// A fresh root context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context, cancelled together with its parent or
    /// independently via its own [`cancel`][Self::cancel].
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the context is cancelled; pends forever otherwise.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// A surface a transaction can be obtained from, tagged by mode so
/// [`run_transaction`] can detect an enclosing transaction.
pub enum Transactable<'a, 'c> {
    Pool(&'a Pool),
    Conn(&'a mut Connection),
    Txn(&'a mut Transaction<'c>),
}

/// Run `callback` inside a transaction.
///
/// When `storage` is already a transaction the callback runs on it directly
/// and the enclosing caller keeps control of commit/rollback; no nested
/// BEGIN is issued. Otherwise a new transaction is begun, committed when the
/// callback returns `Ok`, and rolled back when it returns `Err` with the
/// callback error re-raised (a rollback failure is logged, not surfaced).
pub async fn run_transaction<F, R, E>(
    ctx: &Context,
    storage: Transactable<'_, '_>,
    options: TxnOptions,
    callback: F,
) -> Result<R, E>
where
    for<'t> F: FnOnce(&'t Context, &'t mut Transaction<'_>) -> BoxFuture<'t, Result<R, E>>,
    E: From<Error>,
{
    match storage {
        Transactable::Txn(txn) => callback(ctx, txn).await,
        Transactable::Pool(pool) => {
            let txn = pool.begin(ctx, options).await.map_err(E::from)?;
            drive(ctx, txn, callback).await
        }
        Transactable::Conn(connection) => {
            let txn = connection.begin(ctx, options).await.map_err(E::from)?;
            drive(ctx, txn, callback).await
        }
    }
}

async fn drive<F, R, E>(ctx: &Context, mut txn: Transaction<'_>, callback: F) -> Result<R, E>
where
    for<'t> F: FnOnce(&'t Context, &'t mut Transaction<'_>) -> BoxFuture<'t, Result<R, E>>,
    E: From<Error>,
{
    match callback(ctx, &mut txn).await {
        Ok(value) => {
            txn.commit().await.map_err(E::from)?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = txn.rollback().await {
                tracing::warn!(error = %rollback_error, "rollback failed");
            }
            Err(error)
        }
    }
}
