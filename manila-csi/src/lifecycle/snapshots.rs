use libcsi::CsiError;
use tracing::{debug, error, info, instrument, warn};

use super::{Lifecycle, Poll, WaitError, needs_rollback, wait_failure};
use crate::error::{classify, last_resource_error};
use crate::manila::{CreateSnapshotOpts, Snapshot, SnapshotStatus};

impl Lifecycle<'_> {
    /// Look up the snapshot named `opts.name`, creating it if absent, and wait
    /// for it to become available.
    ///
    /// If the wait budget runs out while the snapshot is still `creating`,
    /// the last observed snapshot is returned as is; the caller reports it as
    /// not ready and the orchestrator retries.
    #[instrument(skip_all, fields(name = %opts.name, share_id = %opts.share_id))]
    pub async fn get_or_create_snapshot(
        &self,
        opts: &CreateSnapshotOpts,
    ) -> Result<Snapshot, CsiError> {
        let snapshot = match self.client.get_snapshot_by_name(&opts.name).await {
            Ok(snapshot) => {
                debug!(snapshot_id = %snapshot.id, status = %snapshot.status, "found existing snapshot");
                snapshot
            }
            Err(e) if e.is_not_found() => {
                let snapshot = self
                    .client
                    .create_snapshot(opts)
                    .await
                    .map_err(|e| classify(e, format!("failed to create snapshot {}", opts.name)))?;
                info!(snapshot_id = %snapshot.id, "snapshot created");
                snapshot
            }
            Err(e) => {
                return Err(classify(e, format!("failed to look up snapshot {}", opts.name)));
            }
        };

        let snapshot_id = snapshot.id.clone();
        let result = match self.evaluate_snapshot(snapshot.clone()).await {
            Ok(Poll::Ready(snapshot)) => Ok(snapshot),
            Ok(Poll::Pending) => match self.wait_for_snapshot(&snapshot_id).await {
                Ok(snapshot) => Ok(snapshot),
                Err(WaitError::Exhausted) => {
                    info!(%snapshot_id, "snapshot still creating, reporting it as not ready");
                    Ok(snapshot)
                }
                Err(e) => Err(wait_failure(
                    e,
                    &format!("snapshot {snapshot_id}"),
                    &self.wait.snapshot,
                )),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &result
            && needs_rollback(e)
        {
            self.rollback_snapshot(&snapshot_id).await;
        }
        result
    }

    pub async fn snapshot(&self, snapshot_id: &str) -> Result<Snapshot, CsiError> {
        self.client
            .get_snapshot_by_id(snapshot_id)
            .await
            .map_err(|e| classify(e, format!("failed to get snapshot {snapshot_id}")))
    }

    /// Delete a snapshot.  A snapshot that no longer exists counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CsiError> {
        match self.client.delete_snapshot(snapshot_id).await {
            Ok(()) => {
                info!("snapshot deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("snapshot already gone");
                Ok(())
            }
            Err(e) => Err(classify(e, format!("failed to delete snapshot {snapshot_id}"))),
        }
    }

    async fn evaluate_snapshot(&self, snapshot: Snapshot) -> Result<Poll<Snapshot>, CsiError> {
        match snapshot.status {
            SnapshotStatus::Available => Ok(Poll::Ready(snapshot)),
            SnapshotStatus::Creating => Ok(Poll::Pending),
            status if status.is_error() => {
                let cause = last_resource_error(self.client, &snapshot.id).await;
                Err(cause.into_csi(format!(
                    "snapshot {} ({}) entered status {status}",
                    snapshot.id, snapshot.name
                )))
            }
            status => Err(CsiError::Internal(format!(
                "snapshot {} ({}) is in unexpected status {status}, waiting for available",
                snapshot.id, snapshot.name
            ))),
        }
    }

    async fn wait_for_snapshot(&self, snapshot_id: &str) -> Result<Snapshot, WaitError> {
        let this = *self;
        self.wait
            .snapshot
            .wait(self.cancel, move || async move {
                let snapshot = this.snapshot(snapshot_id).await?;
                this.evaluate_snapshot(snapshot).await
            })
            .await
    }

    async fn rollback_snapshot(&self, snapshot_id: &str) {
        warn!(%snapshot_id, "rolling back snapshot");
        if let Err(e) = self.delete_snapshot(snapshot_id).await {
            error!(%snapshot_id, error = %e, "failed to roll back snapshot");
            return;
        }

        let this = *self;
        let gone = self
            .wait
            .rollback
            .wait(self.cancel, move || async move {
                match this.client.get_snapshot_by_id(snapshot_id).await {
                    Ok(_) => Ok(Poll::Pending),
                    Err(e) if e.is_not_found() => Ok(Poll::Ready(())),
                    Err(e) => Err(classify(e, format!("failed to get snapshot {snapshot_id}"))),
                }
            })
            .await;
        if let Err(e) = gone {
            warn!(%snapshot_id, error = %e, "snapshot rollback did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    use crate::config::WaitConfig;
    use crate::manila::fake::{FakeManila, available_share};

    fn fake_with_share() -> FakeManila {
        let fake = FakeManila::new();
        fake.insert_share(available_share("share-a", "pvc-1", "NFS"));
        fake
    }

    fn opts(name: &str) -> CreateSnapshotOpts {
        CreateSnapshotOpts {
            name: name.to_owned(),
            description: String::new(),
            share_id: "share-a".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_converges() {
        let fake = fake_with_share();
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let snapshot = lifecycle.get_or_create_snapshot(&opts("snap-1")).await.unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Available);
        assert_eq!(snapshot.share_id, "share-a");

        let again = lifecycle.get_or_create_snapshot(&opts("snap-1")).await.unwrap();
        assert_eq!(again.id, snapshot.id);
        assert_eq!(fake.calls().create_snapshot, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_snapshot_is_reported_not_ready() {
        let fake = fake_with_share();
        fake.set_snapshot_script(vec![]);
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let snapshot = lifecycle.get_or_create_snapshot(&opts("snap-1")).await.unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Creating);
        assert_eq!(fake.calls().delete_snapshot, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_snapshot_is_rolled_back() {
        let fake = fake_with_share();
        fake.set_snapshot_script(vec![SnapshotStatus::Creating, SnapshotStatus::Error]);
        fake.set_error_detail("008");
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let err = lifecycle
            .get_or_create_snapshot(&opts("snap-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert!(err.message().contains("snap-1"));
        assert_eq!(fake.calls().delete_snapshot, 1);
        assert!(fake.snapshot("snapshot-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_snapshot_wait() {
        let fake = fake_with_share();
        fake.set_snapshot_script(vec![]);
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        cancel.cancel();
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let err = lifecycle
            .get_or_create_snapshot(&opts("snap-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn deleting_missing_snapshot_succeeds() {
        let fake = FakeManila::new();
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        lifecycle.delete_snapshot("snapshot-missing").await.unwrap();
    }
}
