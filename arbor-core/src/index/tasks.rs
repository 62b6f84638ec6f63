//! Task rows: persisted so status polling survives restarts.

use super::NodeIndex;
use crate::task::{now_rfc3339, Task, TaskStatus};
use rusqlite::{params, OptionalExtension};

const TASK_SELECT: &str =
    "id, snapshot_id, origin, status, progress, message, error, result_id, created_at, updated_at";

impl NodeIndex {
    pub fn insert_task(&self, task: &Task) -> crate::Result<()> {
        self.conn().execute(
            "INSERT INTO tasks (id, snapshot_id, origin, status, progress, message, error, result_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id,
                task.snapshot_id,
                task.origin,
                task.status.as_str(),
                task.progress,
                task.message,
                task.error,
                task.result_id,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> crate::Result<Option<Task>> {
        let task = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_SELECT),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Record progress. Progress never decreases and terminal rows are left alone.
    pub fn update_task_progress(
        &self,
        id: &str,
        status: TaskStatus,
        progress: u8,
        message: &str,
    ) -> crate::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = ?2, progress = MAX(progress, ?3), message = ?4, updated_at = ?5
             WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
            params![id, status.as_str(), progress.min(100), message, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn complete_task(&self, id: &str, result_id: &str, message: &str) -> crate::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = 'completed', progress = 100, message = ?3, result_id = ?2, updated_at = ?4
             WHERE id = ?1",
            params![id, result_id, message, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Mark a task failed or cancelled, keeping its last progress.
    pub fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        message: &str,
        error: Option<&str>,
    ) -> crate::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = ?2, message = ?3, error = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, status.as_str(), message, error, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Tasks left non-terminal by a previous process are marked failed.
    pub fn fail_stale_tasks(&self) -> crate::Result<usize> {
        Ok(self.conn().execute(
            "UPDATE tasks SET status = 'failed', error = 'Interrupted by restart', updated_at = ?1
             WHERE status IN ('pending', 'processing')",
            params![now_rfc3339()],
        )?)
    }
}

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let progress: i64 = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        origin: row.get(2)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        progress: progress.clamp(0, 100) as u8,
        message: row.get(5)?,
        error: row.get(6)?,
        result_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let index = NodeIndex::open_in_memory().unwrap();
        let task = Task::new("t1", "snap", "/tmp/demo");
        index.insert_task(&task).unwrap();

        index
            .update_task_progress("t1", TaskStatus::Processing, 40, "files")
            .unwrap();
        index
            .update_task_progress("t1", TaskStatus::Processing, 10, "stale")
            .unwrap();
        let stored = index.get_task("t1").unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Processing);
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.message, "stale");

        index.complete_task("t1", "snap", "Done").unwrap();
        index
            .update_task_progress("t1", TaskStatus::Processing, 50, "late")
            .unwrap();
        let stored = index.get_task("t1").unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.result_id.as_deref(), Some("snap"));
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_failure_keeps_error_and_stale_tasks_fail() {
        let index = NodeIndex::open_in_memory().unwrap();
        index.insert_task(&Task::new("t1", "snap", "o")).unwrap();
        index.insert_task(&Task::new("t2", "snap", "o")).unwrap();

        index
            .finish_task("t1", TaskStatus::Failed, "Failed", Some("clone failed"))
            .unwrap();
        let failed = index.get_task("t1").unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("clone failed"));

        assert_eq!(index.fail_stale_tasks().unwrap(), 1);
        assert_eq!(
            index.get_task("t2").unwrap().unwrap().status,
            TaskStatus::Failed
        );
        assert!(index.get_task("missing").unwrap().is_none());
    }
}
