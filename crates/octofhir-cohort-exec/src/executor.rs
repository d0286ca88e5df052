//! Plan execution with guaranteed cleanup

use crate::session::{QueryResult, Session, SessionError};
use futures::future::join_all;
use indexmap::IndexMap;
use octofhir_cohort_compiler::{QueryPlan, Statement, StatementRole};
use octofhir_cohort_diagnostics::{COH0200, COH0201, COH0202, COH0203, CohortError, Result};
use std::future::Future;
use std::time::Duration;

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub session_id: String,
    /// Measure results keyed by statement label, in plan order
    pub measures: IndexMap<String, QueryResult>,
    pub statements_run: usize,
}

impl ExecutionReport {
    pub fn measure(&self, label: &str) -> Option<&QueryResult> {
        self.measures.get(label)
    }

    /// `(step_id, person_count)` of a sequential-grammar plan
    pub fn step_counts(&self) -> Vec<(i64, i64)> {
        self.measure("measure:step_counts")
            .map(|result| {
                result
                    .i64_column("step_id")
                    .into_iter()
                    .zip(result.i64_column("person_count"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows of the final cohort measure
    pub fn cohort(&self) -> Option<&QueryResult> {
        self.measure("measure:cohort")
    }
}

/// Why the body of a plan stopped
#[derive(Debug)]
enum Interruption {
    Failed { label: String, error: SessionError },
    TimedOut(Duration),
    Cancelled,
}

/// Runs plans statement by statement on one session
#[derive(Debug, Clone, Default)]
pub struct PlanExecutor {
    timeout: Option<Duration>,
}

impl PlanExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the non-cleanup statements; cleanup always runs after the bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn run(&self, plan: &QueryPlan, session: &dyn Session) -> Result<ExecutionReport> {
        self.run_until(plan, session, futures::future::pending()).await
    }

    /// Run independent plans concurrently, each on its own session
    ///
    /// Results come back in input order; one failing plan does not stop the others.
    pub async fn run_each(
        &self,
        jobs: &[(&QueryPlan, &dyn Session)],
    ) -> Vec<Result<ExecutionReport>> {
        join_all(jobs.iter().map(|(plan, session)| self.run(plan, *session))).await
    }

    /// Like [`run`](Self::run), abandoning the body once `cancelled` resolves
    pub async fn run_until<F>(
        &self,
        plan: &QueryPlan,
        session: &dyn Session,
        cancelled: F,
    ) -> Result<ExecutionReport>
    where
        F: Future<Output = ()> + Send,
    {
        log::info!(
            "running {} plan (session {}, {} statements)",
            plan.grammar,
            plan.session_id,
            plan.statements.len()
        );
        let mut report = ExecutionReport {
            session_id: plan.session_id.clone(),
            ..ExecutionReport::default()
        };

        let outcome = {
            let body = run_body(plan, session, &mut report);
            let bounded = async {
                match self.timeout {
                    Some(limit) => tokio::time::timeout(limit, body)
                        .await
                        .unwrap_or(Err(Interruption::TimedOut(limit))),
                    None => body.await,
                }
            };
            tokio::select! {
                biased;
                () = cancelled => Err(Interruption::Cancelled),
                outcome = bounded => outcome,
            }
        };

        let cleanup = run_cleanup(plan, session).await;
        match (outcome, cleanup) {
            (Ok(()), Ok(())) => {
                log::info!("plan finished after {} statements", report.statements_run);
                Ok(report)
            }
            (Ok(()), Err((label, error))) => Err(CohortError::Execution {
                code: COH0203,
                message: format!("cleanup failed: {error}"),
                statement: Some(label),
                cleaned_up: false,
            }),
            (Err(interruption), cleanup) => {
                let cleaned_up = cleanup.is_ok();
                if let Err((label, error)) = &cleanup {
                    log::warn!("cleanup statement {label} failed: {error}");
                }
                Err(interruption_error(interruption, cleaned_up))
            }
        }
    }
}

async fn run_body(
    plan: &QueryPlan,
    session: &dyn Session,
    report: &mut ExecutionReport,
) -> std::result::Result<(), Interruption> {
    for statement in plan.body() {
        log::debug!("running {}", statement.label);
        let result = match statement.role {
            StatementRole::Measure => session.query(&statement.sql).await.map(|rows| {
                report.measures.insert(statement.label.clone(), rows);
            }),
            _ => session.execute(&statement.sql).await.map(drop),
        };
        result.map_err(|error| Interruption::Failed {
            label: statement.label.clone(),
            error,
        })?;
        report.statements_run += 1;
    }
    Ok(())
}

/// Run every cleanup statement; the first failure is reported after all were attempted
async fn run_cleanup(
    plan: &QueryPlan,
    session: &dyn Session,
) -> std::result::Result<(), (String, SessionError)> {
    let mut first_error = None;
    for Statement { label, sql, .. } in plan.cleanup() {
        log::debug!("running {label}");
        if let Err(error) = session.execute(sql).await {
            first_error.get_or_insert((label.clone(), error));
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn interruption_error(interruption: Interruption, cleaned_up: bool) -> CohortError {
    let (code, message, statement) = match interruption {
        Interruption::Failed {
            label,
            error: error @ SessionError::ConnectionLost(_),
        } => (COH0201, error.to_string(), Some(label)),
        Interruption::Failed { label, error } => (COH0200, error.to_string(), Some(label)),
        Interruption::TimedOut(limit) => (
            COH0202,
            format!("plan did not finish within {}ms", limit.as_millis()),
            None,
        ),
        Interruption::Cancelled => (COH0202, "plan execution was cancelled".to_string(), None),
    };
    CohortError::Execution {
        code,
        message,
        statement,
        cleaned_up,
    }
}
