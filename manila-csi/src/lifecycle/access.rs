use libcsi::CsiError;
use tracing::{debug, info, instrument};

use super::{Lifecycle, Poll, wait_failure};
use crate::error::classify;
use crate::manila::{AccessRight, GrantAccessOpts};

impl Lifecycle<'_> {
    /// List the access rules of a share.
    pub async fn access_rights(&self, share_id: &str) -> Result<Vec<AccessRight>, CsiError> {
        self.client
            .get_access_rights(share_id)
            .await
            .map_err(|e| classify(e, format!("failed to list access rights of share {share_id}")))
    }

    /// Reuse the rule on `share_id` that grants exactly `wanted`, or request
    /// a new one.
    #[instrument(skip_all, fields(share_id = %share_id, access_to = %wanted.access_to))]
    pub async fn get_or_grant_access(
        &self,
        share_id: &str,
        wanted: &GrantAccessOpts,
    ) -> Result<AccessRight, CsiError> {
        if let Some(existing) = self
            .access_rights(share_id)
            .await?
            .into_iter()
            .find(|r| r.matches(wanted))
        {
            debug!(access_id = %existing.id, "reusing access right");
            return Ok(existing);
        }

        let right = self
            .client
            .grant_access(share_id, wanted)
            .await
            .map_err(|e| classify(e, format!("failed to grant access to share {share_id}")))?;
        info!(access_id = %right.id, access_type = %right.access_type, "access granted");
        Ok(right)
    }

    /// Wait until the backend has issued the key of a keyed access rule.
    #[instrument(skip_all, fields(share_id = %right.share_id, access_id = %right.id))]
    pub async fn wait_for_access_key(&self, right: AccessRight) -> Result<AccessRight, CsiError> {
        if right.key().is_some() {
            return Ok(right);
        }

        let this = *self;
        let (share_id, access_id) = (right.share_id.as_str(), right.id.as_str());
        self.wait
            .access
            .wait(self.cancel, move || async move {
                let found = this
                    .access_rights(share_id)
                    .await?
                    .into_iter()
                    .find(|r| r.id == access_id);
                match found {
                    Some(r) if r.key().is_some() => Ok(Poll::Ready(r)),
                    Some(_) => Ok(Poll::Pending),
                    None => Err(CsiError::NotFound(format!(
                        "access right {access_id} of share {share_id} disappeared"
                    ))),
                }
            })
            .await
            .map_err(|e| {
                wait_failure(
                    e,
                    &format!("access key of access right {access_id}"),
                    &self.wait.access,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    use crate::config::WaitConfig;
    use crate::manila::fake::{FakeManila, available_share};
    use crate::manila::{AccessLevel, AccessType};

    fn cephx(to: &str) -> GrantAccessOpts {
        GrantAccessOpts {
            access_type: AccessType::Cephx,
            access_to: to.to_owned(),
            access_level: AccessLevel::Rw,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn grant_is_reused() {
        let fake = FakeManila::new();
        fake.insert_share(available_share("share-a", "pvc-1", "CEPHFS"));
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let first = lifecycle.get_or_grant_access("share-a", &cephx("pvc-1")).await.unwrap();
        let second = lifecycle.get_or_grant_access("share-a", &cephx("pvc-1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(fake.calls().grant_access, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn key_is_polled_until_issued() {
        let fake = FakeManila::new();
        fake.insert_share(available_share("share-a", "pvc-1", "CEPHFS"));
        fake.set_key_delay(3);
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let right = lifecycle.get_or_grant_access("share-a", &cephx("pvc-1")).await.unwrap();
        assert_eq!(right.key(), None);
        let right = lifecycle.wait_for_access_key(right).await.unwrap();
        assert!(right.key().unwrap().starts_with("AQD-key-"));
    }

    #[tokio::test(start_paused = true)]
    async fn key_never_issued_exceeds_deadline() {
        let fake = FakeManila::new();
        fake.insert_share(available_share("share-a", "pvc-1", "CEPHFS"));
        fake.set_key_delay(100);
        let (wait, cancel) = (WaitConfig::default(), CancellationToken::new());
        let lifecycle = Lifecycle::new(&fake, &wait, &cancel);

        let right = lifecycle.get_or_grant_access("share-a", &cephx("pvc-1")).await.unwrap();
        let err = lifecycle.wait_for_access_key(right).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }
}
