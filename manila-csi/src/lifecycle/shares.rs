use libcsi::CsiError;
use tracing::{debug, error, info, instrument, warn};

use super::{Backoff, Lifecycle, Poll, needs_rollback, wait_failure};
use crate::error::{classify, last_resource_error};
use crate::manila::{CreateShareOpts, ExportLocation, Share, ShareStatus};

const CREATING: &[ShareStatus] = &[ShareStatus::Creating, ShareStatus::CreatingFromSnapshot];
const EXTENDING: &[ShareStatus] = &[ShareStatus::Extending];

impl Lifecycle<'_> {
    /// Look up the share named `opts.name`, creating it if absent, and wait
    /// until it is available.
    ///
    /// A share that ends up in an error or unexpected state is deleted before
    /// the error is returned.
    #[instrument(skip_all, fields(name = %opts.name))]
    pub async fn get_or_create_share(&self, opts: &CreateShareOpts) -> Result<Share, CsiError> {
        let share = match self.client.get_share_by_name(&opts.name).await {
            Ok(share) => {
                debug!(share_id = %share.id, status = %share.status, "found existing share");
                share
            }
            Err(e) if e.is_not_found() => {
                let share = self
                    .client
                    .create_share(opts)
                    .await
                    .map_err(|e| classify(e, format!("failed to create share {}", opts.name)))?;
                info!(share_id = %share.id, size = share.size, "share created");
                share
            }
            Err(e) => {
                return Err(classify(e, format!("failed to look up share {}", opts.name)));
            }
        };

        let share_id = share.id.clone();
        let result = match self
            .evaluate_share(share, ShareStatus::Available, CREATING)
            .await
        {
            Ok(Poll::Ready(share)) => Ok(share),
            Ok(Poll::Pending) => {
                self.wait_for_share(&share_id, ShareStatus::Available, CREATING, &self.wait.share)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result
            && needs_rollback(e)
        {
            self.rollback_share(&share_id).await;
        }
        result
    }

    /// Extend `share` to `new_size` GiB and wait for it to become available
    /// again.  Failures leave the share in place.
    #[instrument(skip_all, fields(share_id = %share.id, new_size = new_size))]
    pub async fn extend_share(&self, share: &Share, new_size: i64) -> Result<Share, CsiError> {
        self.client
            .extend_share(&share.id, new_size)
            .await
            .map_err(|e| classify(e, format!("failed to extend share {}", share.id)))?;
        info!(from = share.size, "share extension requested");

        self.wait_for_share(&share.id, ShareStatus::Available, EXTENDING, &self.wait.share)
            .await
    }

    pub async fn share(&self, share_id: &str) -> Result<Share, CsiError> {
        self.client
            .get_share_by_id(share_id)
            .await
            .map_err(|e| classify(e, format!("failed to get share {share_id}")))
    }

    pub async fn share_by_name(&self, name: &str) -> Result<Share, CsiError> {
        self.client
            .get_share_by_name(name)
            .await
            .map_err(|e| classify(e, format!("failed to get share named {name}")))
    }

    pub async fn export_locations(&self, share_id: &str) -> Result<Vec<ExportLocation>, CsiError> {
        self.client
            .get_export_locations(share_id)
            .await
            .map_err(|e| classify(e, format!("failed to list export locations of share {share_id}")))
    }

    /// Delete a share.  A share that no longer exists counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_share(&self, share_id: &str) -> Result<(), CsiError> {
        match self.client.delete_share(share_id).await {
            Ok(()) => {
                info!("share deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("share already gone");
                Ok(())
            }
            Err(e) => Err(classify(e, format!("failed to delete share {share_id}"))),
        }
    }

    async fn evaluate_share(
        &self,
        share: Share,
        desired: ShareStatus,
        transient: &[ShareStatus],
    ) -> Result<Poll<Share>, CsiError> {
        if share.status == desired {
            return Ok(Poll::Ready(share));
        }
        if transient.contains(&share.status) {
            return Ok(Poll::Pending);
        }
        if share.status.is_error() {
            let cause = last_resource_error(self.client, &share.id).await;
            return Err(cause.into_csi(format!(
                "share {} ({}) entered status {}",
                share.id, share.name, share.status
            )));
        }
        Err(CsiError::Internal(format!(
            "share {} ({}) is in unexpected status {}, waiting for {desired}",
            share.id, share.name, share.status
        )))
    }

    async fn wait_for_share(
        &self,
        share_id: &str,
        desired: ShareStatus,
        transient: &[ShareStatus],
        backoff: &Backoff,
    ) -> Result<Share, CsiError> {
        let this = *self;
        backoff
            .wait(self.cancel, move || async move {
                let share = this.share(share_id).await?;
                this.evaluate_share(share, desired, transient).await
            })
            .await
            .map_err(|e| wait_failure(e, &format!("share {share_id}"), backoff))
    }

    /// Best-effort delete followed by a short wait for the share to vanish.
    /// Failures are logged only.
    async fn rollback_share(&self, share_id: &str) {
        warn!(%share_id, "rolling back share");
        if let Err(e) = self.delete_share(share_id).await {
            error!(%share_id, error = %e, "failed to roll back share");
            return;
        }

        let this = *self;
        let gone = self
            .wait
            .rollback
            .wait(self.cancel, move || async move {
                match this.client.get_share_by_id(share_id).await {
                    Ok(_) => Ok(Poll::Pending),
                    Err(e) if e.is_not_found() => Ok(Poll::Ready(())),
                    Err(e) => Err(classify(e, format!("failed to get share {share_id}"))),
                }
            })
            .await;
        if let Err(e) = gone {
            warn!(%share_id, error = %e, "share rollback did not complete");
        }
    }
}
