//! Minimal DAG runner for shell tasks
//!
//! A DAG here is an ordered list of bash tasks; `run` executes them one
//! after another and stops at the first failure. Scheduling is left to
//! whatever invokes the binary.

use crate::error::{MlopsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultArgs {
    pub owner: String,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashTask {
    pub task_id: String,
    pub bash_command: String,
    /// Kill the task when it runs longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<Duration>,
}

impl BashTask {
    pub fn new(task_id: impl Into<String>, bash_command: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            bash_command: bash_command.into(),
            execution_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    async fn execute(&self) -> Result<TaskOutput> {
        let started = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.bash_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.output();

        let output = match self.execution_timeout {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| MlopsError::TaskFailed {
                task_id: self.task_id.clone(),
                reason: format!("timed out after {}s", limit.as_secs()),
            })?,
            None => child.await,
        }
        .map_err(|e| MlopsError::TaskFailed {
            task_id: self.task_id.clone(),
            reason: format!("could not spawn sh: {}", e),
        })?;

        let result = TaskOutput {
            task_id: self.task_id.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_secs: started.elapsed().as_secs_f64(),
        };
        if !output.status.success() {
            return Err(MlopsError::TaskFailed {
                task_id: self.task_id.clone(),
                reason: format!(
                    "exit {}: {}",
                    result.exit_code.map_or("signal".to_string(), |c| c.to_string()),
                    result.stderr.trim()
                ),
            });
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dag {
    pub dag_id: String,
    pub description: String,
    /// `None` means the DAG only runs when triggered
    pub schedule: Option<String>,
    pub catchup: bool,
    pub default_args: DefaultArgs,
    pub tasks: Vec<BashTask>,
}

impl Dag {
    pub fn task(&self, task_id: &str) -> Option<&BashTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Run every task in declaration order
    pub async fn run(&self) -> Result<Vec<TaskOutput>> {
        info!(dag_id = %self.dag_id, tasks = self.tasks.len(), "DAG run started");
        let mut outputs = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            info!(dag_id = %self.dag_id, task_id = %task.task_id, "Task started");
            match task.execute().await {
                Ok(out) => {
                    info!(task_id = %task.task_id, secs = out.duration_secs, "Task succeeded");
                    outputs.push(out);
                }
                Err(e) => {
                    warn!(dag_id = %self.dag_id, task_id = %task.task_id, error = %e, "Task failed");
                    return Err(e);
                }
            }
        }
        info!(dag_id = %self.dag_id, "DAG run finished");
        Ok(outputs)
    }
}

/// Trigger-only DAG running the trip pipeline script
pub fn orch_hw3() -> Dag {
    Dag {
        dag_id: "orch_hw3".to_string(),
        description: "MLOps Homework 3 DAG".to_string(),
        schedule: None,
        catchup: false,
        default_args: DefaultArgs {
            owner: "airflow".to_string(),
            start_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap_or_default(),
        },
        tasks: vec![BashTask::new(
            "run_pipeline_script",
            "python3 /root/my_dags/nyc_pipeline.py",
        )],
    }
}

/// Every DAG the binary knows about
pub fn registered_dags() -> Vec<Dag> {
    vec![orch_hw3()]
}

pub fn find_dag(dag_id: &str) -> Result<Dag> {
    registered_dags()
        .into_iter()
        .find(|d| d.dag_id == dag_id)
        .ok_or_else(|| MlopsError::ConfigError(format!("unknown DAG: {}", dag_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag(tasks: Vec<BashTask>) -> Dag {
        Dag {
            tasks,
            ..orch_hw3()
        }
    }

    #[test]
    fn test_orch_hw3_definition() {
        let d = orch_hw3();
        assert_eq!(d.dag_id, "orch_hw3");
        assert_eq!(d.default_args.owner, "airflow");
        assert_eq!(d.default_args.start_date, NaiveDate::from_ymd_opt(2023, 3, 1).unwrap());
        assert!(d.schedule.is_none());
        assert!(!d.catchup);
        let task = d.task("run_pipeline_script").unwrap();
        assert_eq!(task.bash_command, "python3 /root/my_dags/nyc_pipeline.py");
    }

    #[test]
    fn test_find_dag() {
        assert!(find_dag("orch_hw3").is_ok());
        assert!(matches!(find_dag("nope"), Err(MlopsError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let d = dag(vec![
            BashTask::new("first", "echo one"),
            BashTask::new("second", "echo two"),
        ]);
        let out = d.run().await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].stdout.trim(), "one");
        assert_eq!(out[1].stdout.trim(), "two");
    }

    #[tokio::test]
    async fn test_failure_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let d = dag(vec![
            BashTask::new("boom", "echo bad >&2; exit 3"),
            BashTask::new("after", format!("touch {}", marker.display())),
        ]);
        let err = d.run().await.unwrap_err();
        match err {
            MlopsError::TaskFailed { task_id, reason } => {
                assert_eq!(task_id, "boom");
                assert!(reason.contains("exit 3"));
                assert!(reason.contains("bad"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_task() {
        let d = dag(vec![BashTask::new("slow", "sleep 5").with_timeout(Duration::from_millis(100))]);
        let err = d.run().await.unwrap_err();
        assert!(matches!(err, MlopsError::TaskFailed { ref reason, .. } if reason.contains("timed out")));
    }
}
