use super::{
    config::SubmitMode,
    registration::{NewUser, Registered, Registration, User, UserStore},
    telemetry::{JobEvent, record_job},
};
use anyhow::Context;
use batchpool::{Error, Outcome, Rejected, Results, WorkerPool};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Counters reported once a run finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Records accepted into the intake queue.
    pub submitted: u64,
    /// Outcomes that were successes.
    pub succeeded: u64,
    /// Outcomes that were failures (invalid record or panic).
    pub failed: u64,
    /// Records refused because the intake queue was full.
    pub rejected: u64,
    /// Lines that could not be parsed as a record.
    pub malformed: u64,
    /// True when the run was cut short by a shutdown signal.
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct FeedStats {
    submitted: u64,
    rejected: u64,
    malformed: u64,
}

/// One line of output per outcome.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeRecord<'a> {
    Registered {
        worker: usize,
        elapsed_ms: f64,
        line: usize,
        user: &'a User,
    },
    Failed {
        worker: usize,
        elapsed_ms: f64,
        error: String,
    },
}

/// Feeds every record from `input` through `pool` and writes one JSON line
/// per outcome to `output`.
///
/// The reader and the writer run concurrently so that neither queue can fill
/// up and stall the other side. When `input` is exhausted the pool is drained
/// and the run ends once its last outcome is written. Cancelling `shutdown`
/// stops reading, stops the pool (queued records are discarded), and writes
/// whatever outcomes were already published.
///
/// The pool must be started and its results not yet taken.
pub async fn run<R, W>(
    pool: Arc<WorkerPool<Registration>>,
    input: R,
    mut output: W,
    submit_mode: SubmitMode,
    shutdown: CancellationToken,
) -> anyhow::Result<RunSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut results = pool.results()?;

    // Cancelled on a signal, or by the writer when it cannot go on.
    let feed_shutdown = shutdown.child_token();
    let feeder = tokio::spawn(feed_records(
        Arc::clone(&pool),
        input,
        Arc::new(UserStore::default()),
        submit_mode,
        feed_shutdown.clone(),
    ));

    let written = write_outcomes(&mut results, &mut output).await;
    if written.is_err() {
        // Workers blocked on publishing fail fast once the receiver is gone.
        feed_shutdown.cancel();
        drop(results);
    }

    let feed = feeder.await.context("record feeder panicked")?;
    let (succeeded, failed) = written?;
    let feed = feed?;

    Ok(RunSummary {
        submitted: feed.submitted,
        succeeded,
        failed,
        rejected: feed.rejected,
        malformed: feed.malformed,
        interrupted: shutdown.is_cancelled(),
    })
}

/// Submits every record, then closes the pool.
///
/// The pool is stopped or drained on every exit path, including errors, so
/// the output queue always closes and the writer always finishes.
async fn feed_records<R>(
    pool: Arc<WorkerPool<Registration>>,
    input: R,
    store: Arc<UserStore>,
    submit_mode: SubmitMode,
    shutdown: CancellationToken,
) -> anyhow::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let fed = submit_records(&pool, input, &store, submit_mode, &shutdown, &mut stats).await;

    let closed = match &fed {
        Ok(lines) if !shutdown.is_cancelled() => {
            tracing::info!("Input exhausted after {lines} line(s), draining pool");
            tokio::select! {
                biased;
                () = shutdown.cancelled() => pool.stop().await,
                res = pool.drain() => res,
            }
        }
        _ => pool.stop().await,
    };

    fed?;
    closed?;
    Ok(stats)
}

/// Returns the number of input lines read.
async fn submit_records<R>(
    pool: &WorkerPool<Registration>,
    input: R,
    store: &Arc<UserStore>,
    submit_mode: SubmitMode,
    shutdown: &CancellationToken,
    stats: &mut FeedStats,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_no = 0_usize;

    loop {
        let line = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            line = lines.next_line() => {
                line.with_context(|| format!("failed to read input line {}", line_no + 1))?
            }
        };
        let Some(line) = line else { break };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        let user: NewUser = match serde_json::from_str(&line) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Skipping malformed record on line {line_no}: {e}");
                stats.malformed += 1;
                continue;
            }
        };

        let item = Registration::new(line_no, user, Arc::clone(store));
        let submitted = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            res = submit(pool, item, submit_mode) => res,
        };

        match submitted {
            Ok(()) => {
                stats.submitted += 1;
                record_job(JobEvent::Submitted);
            }
            Err(rejected) => {
                let (item, reason) = rejected.into_parts();
                match reason {
                    Error::QueueFull => {
                        tracing::warn!(
                            "Rejected record on line {}: intake queue is full",
                            item.line()
                        );
                        stats.rejected += 1;
                        record_job(JobEvent::Rejected);
                    }
                    Error::Closed => {
                        tracing::info!("Pool closed, no more records will be submitted");
                        break;
                    }
                    other => return Err(other.into()),
                }
            }
        }
    }

    Ok(line_no)
}

async fn submit(
    pool: &WorkerPool<Registration>,
    item: Registration,
    submit_mode: SubmitMode,
) -> Result<(), Rejected<Registration>> {
    match submit_mode {
        SubmitMode::Blocking => pool.submit(item).await,
        SubmitMode::NonBlocking => pool.try_submit(item),
        SubmitMode::Timed(wait) => pool.submit_timeout(item, wait).await,
    }
}

/// Drains `results` into `output` until the pool closes it.
async fn write_outcomes<W>(
    results: &mut Results<Registered>,
    output: &mut W,
) -> anyhow::Result<(u64, u64)>
where
    W: AsyncWrite + Unpin,
{
    let mut succeeded = 0;
    let mut failed = 0;

    while let Some(outcome) = results.recv().await {
        let elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0;

        match &outcome.result {
            Ok(_) => {
                succeeded += 1;
                record_job(JobEvent::Succeeded { elapsed_ms });
            }
            Err(failure) => {
                tracing::debug!("Worker {} reported: {failure}", outcome.worker_id);
                failed += 1;
                record_job(JobEvent::Failed { elapsed_ms });
            }
        }

        let mut line = serde_json::to_vec(&to_record(&outcome, elapsed_ms))?;
        line.push(b'\n');
        output
            .write_all(&line)
            .await
            .context("failed to write outcome")?;
    }

    output.flush().await.context("failed to flush output")?;
    Ok((succeeded, failed))
}

fn to_record(outcome: &Outcome<Registered>, elapsed_ms: f64) -> OutcomeRecord<'_> {
    match &outcome.result {
        Ok(registered) => OutcomeRecord::Registered {
            worker: outcome.worker_id,
            elapsed_ms,
            line: registered.line,
            user: &registered.user,
        },
        Err(failure) => OutcomeRecord::Failed {
            worker: outcome.worker_id,
            elapsed_ms,
            error: failure.message().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn started_pool(workers: usize, intake: usize) -> anyhow::Result<Arc<WorkerPool<Registration>>> {
        let pool = Arc::new(WorkerPool::new(workers, intake, 16)?);
        pool.start()?;
        Ok(pool)
    }

    fn parse_output(bytes: &[u8]) -> anyhow::Result<Vec<Value>> {
        bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).map_err(Into::into))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writes_one_line_per_record() -> anyhow::Result<()> {
        let input = concat!(
            "{\"name\":\"Ada\",\"email\":\"ada@example.com\"}\n",
            "\n",
            "{\"name\":\"\",\"email\":\"nobody@example.com\"}\n",
            "not json\n",
            "{\"name\":\"Alan\",\"email\":\"alan@example.com\"}\n",
        );

        let pool = started_pool(3, 4)?;
        let mut output = Vec::new();
        let summary = run(
            Arc::clone(&pool),
            BufReader::new(Cursor::new(input.as_bytes().to_vec())),
            &mut output,
            SubmitMode::Blocking,
            CancellationToken::new(),
        )
        .await?;

        assert_eq!(
            summary,
            RunSummary {
                submitted: 3,
                succeeded: 2,
                failed: 1,
                rejected: 0,
                malformed: 1,
                interrupted: false,
            }
        );
        assert_eq!(pool.state(), batchpool::PoolState::Stopped);

        let records = parse_output(&output)?;
        assert_eq!(records.len(), 3);

        let mut lines: Vec<u64> = records
            .iter()
            .filter(|r| r["status"] == "registered")
            .map(|r| r["line"].as_u64().unwrap_or_default())
            .collect();
        lines.sort_unstable();
        assert_eq!(lines, vec![1, 5]);

        let failed: Vec<&Value> = records.iter().filter(|r| r["status"] == "failed").collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["error"], "line 3: name cannot be empty");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_run_stops_the_pool() -> anyhow::Result<()> {
        let pool = started_pool(1, 1)?;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut output = Vec::new();
        let summary = run(
            Arc::clone(&pool),
            BufReader::new(Cursor::new(
                b"{\"name\":\"Ada\",\"email\":\"ada@example.com\"}\n".to_vec(),
            )),
            &mut output,
            SubmitMode::Blocking,
            shutdown,
        )
        .await?;

        assert!(summary.interrupted);
        assert_eq!(summary.submitted, 0);
        assert_eq!(pool.state(), batchpool::PoolState::Stopped);
        assert!(output.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_must_not_be_taken_twice() -> anyhow::Result<()> {
        let pool = started_pool(1, 1)?;
        let _results = pool.results()?;

        let outcome = run(
            Arc::clone(&pool),
            BufReader::new(Cursor::new(Vec::new())),
            Vec::new(),
            SubmitMode::Blocking,
            CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_err());
        pool.stop().await?;
        Ok(())
    }

    fn records(count: usize) -> Vec<u8> {
        (0..count)
            .map(|n| format!("{{\"name\":\"user{n}\",\"email\":\"user{n}@example.com\"}}\n"))
            .collect::<String>()
            .into_bytes()
    }

    /// Runs `count` records with one worker and single-slot queues while the
    /// output is not read for a while, so the pool fills up and submissions
    /// have to be refused.
    async fn run_against_stalled_output(
        count: usize,
        submit_mode: SubmitMode,
    ) -> anyhow::Result<(RunSummary, Vec<Value>)> {
        use tokio::io::AsyncReadExt;

        let pool = Arc::new(WorkerPool::new(1, 1, 1)?);
        pool.start()?;
        let (writer, mut reader) = tokio::io::duplex(16);

        let running = tokio::spawn(run(
            Arc::clone(&pool),
            BufReader::new(Cursor::new(records(count))),
            writer,
            submit_mode,
            CancellationToken::new(),
        ));

        tokio::time::sleep(core::time::Duration::from_millis(300)).await;
        let mut output = Vec::new();
        reader.read_to_end(&mut output).await?;

        let summary = running.await??;
        assert_eq!(pool.state(), batchpool::PoolState::Stopped);
        Ok((summary, parse_output(&output)?))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn non_blocking_submit_counts_rejections() -> anyhow::Result<()> {
        const RECORDS: usize = 200;

        let (summary, outcomes) =
            run_against_stalled_output(RECORDS, SubmitMode::NonBlocking).await?;

        assert!(summary.rejected > 0);
        assert_eq!(summary.submitted + summary.rejected, RECORDS as u64);
        assert_eq!(summary.succeeded, summary.submitted);
        assert_eq!(outcomes.len() as u64, summary.submitted);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timed_submit_counts_rejections() -> anyhow::Result<()> {
        const RECORDS: usize = 20;

        let (summary, outcomes) = run_against_stalled_output(
            RECORDS,
            SubmitMode::Timed(core::time::Duration::from_millis(5)),
        )
        .await?;

        assert!(summary.rejected > 0);
        assert_eq!(summary.submitted + summary.rejected, RECORDS as u64);
        assert_eq!(outcomes.len() as u64, summary.submitted);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unreadable_input_fails_and_stops_the_pool() -> anyhow::Result<()> {
        let pool = started_pool(2, 4)?;
        let mut input = b"{\"name\":\"Ada\",\"email\":\"ada@example.com\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe\n");

        let outcome = tokio::time::timeout(
            core::time::Duration::from_secs(5),
            run(
                Arc::clone(&pool),
                BufReader::new(Cursor::new(input)),
                Vec::new(),
                SubmitMode::Blocking,
                CancellationToken::new(),
            ),
        )
        .await?;

        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert_eq!(pool.state(), batchpool::PoolState::Stopped);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_write_stops_the_pool() -> anyhow::Result<()> {
        let pool = started_pool(2, 4)?;
        let (writer, reader) = tokio::io::duplex(16);
        drop(reader);

        let outcome = tokio::time::timeout(
            core::time::Duration::from_secs(5),
            run(
                Arc::clone(&pool),
                BufReader::new(Cursor::new(records(50))),
                writer,
                SubmitMode::Blocking,
                CancellationToken::new(),
            ),
        )
        .await?;

        assert!(outcome.is_err());
        assert_eq!(pool.state(), batchpool::PoolState::Stopped);
        Ok(())
    }
}
