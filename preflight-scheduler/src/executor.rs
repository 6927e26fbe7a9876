//! Dispatches a due `UpdateJob` against the external task/kanban back-ends
//! and writes the result back through the repository (spec.md §4.7).

use chrono::Utc;
use preflight_core::TasksSource;
use preflight_errors::{Context, ErrorKind, PreflightError};
use preflight_repository::{ChecklistUpdate, KanbanClient, Repository, TaskServiceClient};
use tracing::{error, info};

use crate::queue::UpdateJob;

pub struct JobExecutor<R, T, K> {
    repository: R,
    task_service: T,
    kanban: K,
}

impl<R, T, K> JobExecutor<R, T, K>
where
    R: Repository,
    T: TaskServiceClient,
    K: KanbanClient,
{
    pub fn new(repository: R, task_service: T, kanban: K) -> Self {
        Self { repository, task_service, kanban }
    }

    pub async fn execute(&self, job: &UpdateJob) -> Result<(), PreflightError> {
        let checklist = job
            .user
            .checklist(&job.checklist_id)
            .ok_or_else(|| PreflightError::simple(ErrorKind::NotFound, format!("checklist {} not found on user", job.checklist_id)))?;

        if job.is_remove {
            self.execute_remove(job).await
        } else {
            self.execute_add(job, checklist.tasks_source, &checklist.tasks, checklist.kanban_ref.as_ref()).await
        }
    }

    async fn execute_add(
        &self,
        job: &UpdateJob,
        source: TasksSource,
        literal_tasks: &[String],
        kanban_ref: Option<&preflight_repository::KanbanRef>,
    ) -> Result<(), PreflightError> {
        let names: Vec<String> = match source {
            TasksSource::Literal => literal_tasks.to_vec(),
            TasksSource::Kanban => {
                let kanban_ref = kanban_ref
                    .ok_or_else(|| PreflightError::simple(ErrorKind::Validation, "kanban-sourced checklist missing kanban_ref"))?;
                self.kanban.open_cards(kanban_ref).await.context(format!(
                    "executor.execute_add: fetching open cards for checklist {}",
                    job.checklist_id
                ))?
            }
        };

        let mut ids = Vec::with_capacity(names.len());
        for name in &names {
            match self.task_service.post_task(name).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    // On first failure the job aborts; ids already obtained
                    // are not rolled back with the back-end, and are also
                    // not written to the record here — a known leakage
                    // (spec.md §4.7, decided in DESIGN.md's open questions).
                    error!(checklist_id = %job.checklist_id, posted = ids.len(), "add job aborted mid-post");
                    return Err(e.context(format!("executor.execute_add: checklist {}", job.checklist_id)));
                }
            }
        }

        self.repository
            .record_checklist_update(&job.user.id, &job.checklist_id, ChecklistUpdate::Add { ids }, Utc::now())
            .await
            .context(format!("executor.execute_add: write-back for checklist {}", job.checklist_id))?;

        info!(checklist_id = %job.checklist_id, "checklist materialized");
        Ok(())
    }

    async fn execute_remove(&self, job: &UpdateJob) -> Result<(), PreflightError> {
        let mut remaining = job.task_ids.clone();
        while !remaining.is_empty() {
            let id = remaining[0].clone();
            if let Err(e) = self.task_service.delete_task(&id).await {
                // Leave the record reflecting exactly what's left undeleted,
                // per spec.md §4.7 ("failures per id abort and leave the
                // record partially cleared").
                let _ = self
                    .repository
                    .record_checklist_update(&job.user.id, &job.checklist_id, ChecklistUpdate::Remove { remaining_ids: remaining.clone() }, Utc::now())
                    .await;
                return Err(e.context(format!("executor.execute_remove: checklist {}", job.checklist_id)));
            }
            remaining.remove(0);
        }

        self.repository
            .record_checklist_update(&job.user.id, &job.checklist_id, ChecklistUpdate::Remove { remaining_ids: remaining }, Utc::now())
            .await
            .context(format!("executor.execute_remove: write-back for checklist {}", job.checklist_id))?;

        info!(checklist_id = %job.checklist_id, "checklist retracted");
        Ok(())
    }
}
