use std::path::Path;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analytics;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, TableRole};
use crate::merge::merge;
use crate::models::{
    DataDocument, JobRecord, JobStatus, LogEntry, MergedRecord, UploadKind, UploadRecord,
};
use crate::normalize::{normalize_loose, normalize_mother};
use crate::sla::classify_all;
use crate::store::Repositories;
use crate::table::RawTable;

/// Normalizes both exports and joins them.
pub fn reconcile(
    mother: &RawTable,
    loose: &RawTable,
    config: &PipelineConfig,
) -> Result<Vec<MergedRecord>> {
    let mother = normalize_mother(mother)?;
    let loose = normalize_loose(loose, &config.marketplace_token)?;
    Ok(merge(mother, &loose))
}

/// Runs reconciliation jobs and tracks their status in the store.
pub struct Pipeline {
    repos: Repositories,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(repos: Repositories, config: PipelineConfig) -> Self {
        Self { repos, config }
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    pub async fn register_upload(&self, kind: UploadKind, path: &Path) -> Result<UploadRecord> {
        let upload = UploadRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            file_path: path.display().to_string(),
            uploaded_at: Utc::now(),
        };
        self.repos.save_upload(&upload).await?;
        info!(upload_id = %upload.id, kind = ?kind, path = %upload.file_path, "upload registered");
        Ok(upload)
    }

    /// Creates a pending job once both uploads are known.
    pub async fn submit(&self, mother_id: &str, loose_id: &str) -> Result<JobRecord> {
        self.require_upload(mother_id, TableRole::Mother).await?;
        self.require_upload(loose_id, TableRole::Loose).await?;

        let job = JobRecord::pending(mother_id, loose_id);
        self.repos.save_job(&job).await?;
        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    /// Drives one job to `completed` or `failed`. Never returns an error: any
    /// failure is recorded on the job and in the job's log.
    pub async fn run(&self, job_id: Uuid) {
        let mut job = match self.repos.job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id = %job_id, "job not found");
                return;
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "could not load job");
                return;
            }
        };

        match self.execute(&mut job).await {
            Ok(()) => info!(job_id = %job.id, "job completed"),
            Err(err) => self.fail(&mut job, &err.to_string()).await,
        }
    }

    /// Marks a job failed from outside `run`, e.g. after its task panicked.
    pub async fn abandon(&self, job_id: Uuid, message: &str) {
        match self.repos.job(job_id).await {
            Ok(Some(mut job)) if !job.status.is_terminal() => self.fail(&mut job, message).await,
            Ok(_) => {}
            Err(err) => error!(job_id = %job_id, error = %err, "could not load job"),
        }
    }

    async fn execute(&self, job: &mut JobRecord) -> Result<()> {
        let mother = self.require_upload(&job.mother_id, TableRole::Mother).await?;
        let loose = self.require_upload(&job.loose_id, TableRole::Loose).await?;
        self.transition(job, JobStatus::Processing, 10, None).await?;

        let mother_table = RawTable::load(Path::new(&mother.file_path)).await?;
        let loose_table = RawTable::load(Path::new(&loose.file_path)).await?;
        let merged = reconcile(&mother_table, &loose_table, &self.config)?;
        info!(job_id = %job.id, records = merged.len(), "merged inputs");
        self.transition(job, JobStatus::Processing, 50, None).await?;

        let records = classify_all(merged);
        let kpis = analytics::global_kpis(&records);
        let rankings = analytics::rankings(&records, self.config.ranking_limit);

        self.repos
            .save_data(job.id, &DataDocument { data: records })
            .await?;
        self.repos.save_kpis(job.id, &kpis).await?;
        self.repos.save_rankings(job.id, &rankings).await?;

        self.transition(job, JobStatus::Completed, 100, Some("Processing completed"))
            .await
    }

    async fn transition(
        &self,
        job: &mut JobRecord,
        status: JobStatus,
        progress: u8,
        message: Option<&str>,
    ) -> Result<()> {
        job.status = status;
        job.progress = progress;
        if let Some(message) = message {
            job.message = Some(message.to_string());
        }
        job.last_updated = Utc::now();
        self.repos.save_job(job).await?;
        Ok(())
    }

    async fn fail(&self, job: &mut JobRecord, message: &str) {
        error!(job_id = %job.id, error = %message, "job failed");

        let progress = job.progress;
        if let Err(err) = self
            .transition(job, JobStatus::Failed, progress, Some(message))
            .await
        {
            warn!(job_id = %job.id, error = %err, "could not record job failure");
        }

        let entry = LogEntry {
            job_id: job.id,
            level: "error".to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.repos.append_log(&entry).await {
            warn!(job_id = %job.id, error = %err, "could not write job log entry");
        }
    }

    async fn require_upload(&self, id: &str, role: TableRole) -> Result<UploadRecord> {
        let upload = self
            .repos
            .upload(id)
            .await?
            .ok_or_else(|| PipelineError::UploadNotFound(id.to_string()))?;

        let actual = TableRole::from(upload.kind);
        if actual != role {
            return Err(PipelineError::UploadKindMismatch {
                id: id.to_string(),
                expected: role,
                actual,
            });
        }
        Ok(upload)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{LooseRow, UploadKind};
    use crate::normalize::{LOOSE_COLUMNS, MOTHER_COLUMNS};
    use crate::sla::SlaOutcome;
    use crate::store::tests::DownStore;
    use crate::store::MemoryStore;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn mother_csv(order_ids: &[&str]) -> String {
        let mut csv = MOTHER_COLUMNS.join(";");
        for id in order_ids {
            csv.push_str(&format!("\n2024-01-05;{id};ok;sim;ACME;C1;Norte;ops"));
        }
        csv
    }

    /// Rows of (order id, seller, promised, delivered, delay).
    pub(crate) fn loose_csv(rows: &[(&str, &str, &str, &str, &str)]) -> String {
        let mut csv = LOOSE_COLUMNS.join(";");
        for (order, seller, promised, delivered, delay) in rows {
            csv.push_str(&format!(
                "\nsim;2024-01-02;2024-01-09;PK-{order};ET-{order};{order};10;{seller};CC1;entregue;\
                 Ana;01310-100;Rua A;10;Centro;São Paulo;;2024-01-08;{promised};{delivered};ok;3;{delay}"
            ));
        }
        csv
    }

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub pipeline: Pipeline,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_store(Arc::new(MemoryStore::new()))
        }

        pub fn with_store(store: Arc<dyn crate::store::DocumentStore>) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                pipeline: Pipeline::new(Repositories::new(store), PipelineConfig::default()),
            }
        }

        pub fn write(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }

        pub async fn job_for(&self, mother: &str, loose: &str) -> JobRecord {
            let mother = self.write("mother.csv", mother);
            let loose = self.write("loose.csv", loose);
            let mother = self
                .pipeline
                .register_upload(UploadKind::Mother, &mother)
                .await
                .unwrap();
            let loose = self
                .pipeline
                .register_upload(UploadKind::Loose, &loose)
                .await
                .unwrap();
            self.pipeline.submit(&mother.id, &loose.id).await.unwrap()
        }
    }

    #[test]
    fn reconcile_keeps_every_manifest_row() {
        let mother = RawTable::from_reader(mother_csv(&["1", "2", "3"]).as_bytes()).unwrap();
        let loose = RawTable::from_reader(
            loose_csv(&[
                ("1", "Meli A", "2024-01-10", "2024-01-10", ""),
                ("2", "Meli B", "2024-01-10", "2024-01-12", "2"),
            ])
            .as_bytes(),
        )
        .unwrap();

        let merged = reconcile(&mother, &loose, &PipelineConfig::default()).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].order.order_id.as_deref(), Some("3"));
        assert_eq!(merged[2].delivery, LooseRow::default());
    }

    #[tokio::test]
    async fn completed_job_persists_all_artifacts() {
        let fixture = Fixture::new();
        let job = fixture
            .job_for(
                &mother_csv(&["1", "2", "3"]),
                &loose_csv(&[
                    ("1", "MELI A", "2024-01-10", "2024-01-10", ""),
                    ("2", "meli b", "2024-01-10", "2024-01-12", "2"),
                    ("4", "Other", "2024-01-10", "2024-01-12", "9"),
                ]),
            )
            .await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        fixture.pipeline.run(job.id).await;

        let repos = fixture.pipeline.repos();
        let stored = repos.job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);

        let data = repos.data(job.id).await.unwrap().unwrap().data;
        let outcomes: Vec<_> = data.iter().map(|r| r.sla_outcome).collect();
        assert_eq!(
            outcomes,
            vec![SlaOutcome::OnTime, SlaOutcome::DeliveredLate, SlaOutcome::NotDelivered]
        );
        assert_eq!(data[1].seller(), Some("Meli B"));
        assert!(data
            .iter()
            .all(|r| r.record.delivery.marketplace_order_id.as_deref() != Some("4")));

        let kpis = repos.kpis(job.id).await.unwrap().unwrap();
        assert_eq!((kpis.total_orders, kpis.on_time, kpis.late), (3, 1, 2));

        let rankings = repos.rankings(job.id).await.unwrap().unwrap();
        assert_eq!(rankings.sellers_most_delays.len(), 1);
        assert_eq!(rankings.sellers_most_delays[0].name, "Meli B");
        assert_eq!(rankings.sellers_highest_volume.len(), 3);
    }

    #[tokio::test]
    async fn schema_error_fails_job_and_logs_it() {
        let fixture = Fixture::new();
        let job = fixture
            .job_for(&mother_csv(&["1"]), "Vendedor;pedido_marketplace\nMeli;1")
            .await;

        fixture.pipeline.run(job.id).await;

        let repos = fixture.pipeline.repos();
        let stored = repos.job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.progress, 10);
        let message = stored.message.unwrap();
        assert!(message.contains("loose table is missing required columns"));
        assert!(message.contains("PREVISÃO DE ENTREGA"));

        let logs = repos.logs(job.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, message);
        assert!(repos.data(job.id).await.unwrap().is_none());
        assert!(repos.kpis(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_manifest_fails_job() {
        let fixture = Fixture::new();
        let job = fixture
            .job_for(&mother_csv(&[]), &loose_csv(&[("1", "Meli", "", "", "")]))
            .await;

        fixture.pipeline.run(job.id).await;

        let stored = fixture.pipeline.repos().job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.message.as_deref(), Some("mother table has no data rows"));
    }

    #[tokio::test]
    async fn missing_input_file_fails_job() {
        let fixture = Fixture::new();
        let pipeline = &fixture.pipeline;
        let mother = pipeline
            .register_upload(UploadKind::Mother, &fixture.dir.path().join("absent.csv"))
            .await
            .unwrap();
        let loose_path = fixture.write("loose.csv", &loose_csv(&[]));
        let loose = pipeline
            .register_upload(UploadKind::Loose, &loose_path)
            .await
            .unwrap();
        let job = pipeline.submit(&mother.id, &loose.id).await.unwrap();

        pipeline.run(job.id).await;

        let stored = pipeline.repos().job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.message.unwrap().contains("absent.csv"));
    }

    #[tokio::test]
    async fn submit_distinguishes_missing_uploads_from_outages() {
        let fixture = Fixture::new();
        let err = fixture.pipeline.submit("nope", "nada").await.unwrap_err();
        assert!(matches!(err, PipelineError::UploadNotFound(id) if id == "nope"));

        let down = Fixture::with_store(Arc::new(DownStore));
        let err = down.pipeline.submit("nope", "nada").await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn submit_rejects_swapped_uploads() {
        let fixture = Fixture::new();
        let path = fixture.write("mother.csv", &mother_csv(&["1"]));
        let mother = fixture
            .pipeline
            .register_upload(UploadKind::Mother, &path)
            .await
            .unwrap();
        let err = fixture
            .pipeline
            .submit(&mother.id, &mother.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UploadKindMismatch { expected: TableRole::Loose, .. }
        ));
    }

    #[tokio::test]
    async fn abandon_only_touches_unfinished_jobs() {
        let fixture = Fixture::new();
        let job = fixture
            .job_for(&mother_csv(&["1"]), &loose_csv(&[("1", "Meli", "", "", "")]))
            .await;

        fixture.pipeline.abandon(job.id, "worker panicked").await;
        let stored = fixture.pipeline.repos().job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.message.as_deref(), Some("worker panicked"));

        fixture.pipeline.abandon(job.id, "again").await;
        let logs = fixture.pipeline.repos().logs(job.id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }
}
