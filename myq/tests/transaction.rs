use myq::{params, Context, Error, IsolationLevel, TxnOptions};
use myq_test::{eventually, int_rows, Script, TestDriver};

#[tokio::test]
async fn begin_emits_isolation_then_start() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    let pool = driver.pool();
    let ctx = Context::new();

    let txn = pool.begin(&ctx, TxnOptions::default()).await?;
    assert_eq!(
        driver.statements(),
        [
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            "START TRANSACTION READ WRITE",
        ]
    );

    txn.commit().await?;
    assert_eq!(driver.statements().last().map(String::as_str), Some("COMMIT"));
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn isolation_levels_and_read_only_shape_the_sql() -> anyhow::Result<()> {
    let cases = [
        (IsolationLevel::RepeatableRead, "REPEATABLE READ"),
        (IsolationLevel::ReadCommitted, "READ COMMITTED"),
        (IsolationLevel::ReadUncommitted, "READ UNCOMMITTED"),
        (IsolationLevel::Serializable, "SERIALIZABLE"),
    ];

    for (isolation, sql) in cases {
        let driver = TestDriver::new();
        let pool = driver.pool();
        let ctx = Context::new();

        let txn = pool
            .begin(
                &ctx,
                TxnOptions {
                    isolation,
                    read_only: true,
                },
            )
            .await?;
        assert_eq!(
            driver.statements(),
            [
                format!("SET TRANSACTION ISOLATION LEVEL {sql}"),
                "START TRANSACTION READ ONLY".to_owned(),
            ]
        );
        txn.rollback().await?;
        assert_eq!(driver.outstanding(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn statements_run_on_the_transaction_connection() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    driver.script("SELECT id FROM t", int_rows("id", 1..=3));
    let pool = driver.pool();
    let ctx = Context::new();

    let mut txn = pool.begin(&ctx, TxnOptions::default()).await?;
    txn.exec(&ctx, "INSERT INTO t(v) VALUES (?)", params!["a"])
        .await?;

    let row = txn
        .query_row(&ctx, "SELECT id FROM t", params![])
        .await?
        .expect("row");
    assert_eq!(row.get("id")?.as_int(), Some(1));

    txn.commit().await?;
    // One lease for the whole transaction.
    assert_eq!(driver.acquired_count(), 1);
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn closing_a_transaction_stream_early_kills_out_of_band() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    driver.script("SELECT id FROM t", int_rows("id", 1..=500));
    let pool = driver.pool();
    let ctx = Context::new();

    let mut txn = pool.begin(&ctx, TxnOptions::default()).await?;
    let mut rows = txn.query(&ctx, "SELECT id FROM t", params![])?;
    assert!(rows.next().await?);
    rows.close().await?;

    assert!(driver
        .statements()
        .iter()
        .any(|sql| sql.starts_with("KILL QUERY ")));
    // The transaction's connection was not torn down and still commits.
    txn.commit().await?;
    assert_eq!(driver.destroyed_count(), 0);
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn begin_failure_returns_the_lease() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    driver.script(
        "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        Script::Error(myq::DriverError::new(1064, "syntax error")),
    );
    let pool = driver.pool();
    let ctx = Context::new();

    let result = pool
        .begin(
            &ctx,
            TxnOptions {
                isolation: IsolationLevel::Serializable,
                read_only: false,
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Driver(_))));
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn commit_failure_still_returns_the_lease() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    driver.script(
        "COMMIT",
        Script::Error(myq::DriverError::new(1180, "Got error during COMMIT")),
    );
    let pool = driver.pool();
    let ctx = Context::new();

    let txn = pool.begin(&ctx, TxnOptions::default()).await?;
    assert!(matches!(txn.commit().await, Err(Error::Driver(_))));
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn a_dropped_transaction_rolls_back() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    let pool = driver.pool();
    let ctx = Context::new();

    let txn = pool.begin(&ctx, TxnOptions::default()).await?;
    drop(txn);

    eventually(
        || {
            driver.statements().last().map(String::as_str) == Some("ROLLBACK")
                && driver.outstanding() == 0
        },
        "rollback of the dropped transaction",
    )
    .await;
    Ok(())
}

#[tokio::test]
async fn a_connection_outlives_its_transaction() -> anyhow::Result<()> {
    let driver = TestDriver::new();
    let pool = driver.pool();
    let ctx = Context::new();

    let mut conn = pool.conn(&ctx).await?;
    let mut txn = conn.begin(&ctx, TxnOptions::default()).await?;
    txn.exec(&ctx, "INSERT INTO t(v) VALUES (?)", params!["a"])
        .await?;
    txn.commit().await?;

    // Same lease, still usable after the transaction ended.
    assert_eq!(driver.acquired_count(), 1);
    conn.exec(&ctx, "INSERT INTO t(v) VALUES (?)", params!["b"])
        .await?;

    conn.close();
    assert_eq!(driver.outstanding(), 0);
    Ok(())
}
