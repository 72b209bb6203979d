use crate::cli::Command;
use crate::config::AppConfig;
use anyhow::{anyhow, Context, Result};
use snip_core::{
    DeletionRequest, OwnerId, PartitionIndex, RecordStore, Statistics, Store, StoreError,
};
use snip_deleter::{Deleter, DeleterStats};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// An open store plus the deletion pipeline feeding it.
pub struct Session {
    store: Arc<dyn Store>,
    deleter: Deleter,
    config: AppConfig,
}

impl Session {
    /// Spawns the deletion pipeline on the current runtime.
    pub fn start(store: Arc<dyn Store>, config: &AppConfig) -> Self {
        let deleter = Deleter::spawn(Arc::clone(&store), config.deleter);
        Self {
            store,
            deleter,
            config: config.clone(),
        }
    }

    /// Runs one command, printing its result to `out`.
    pub async fn execute(&self, command: &Command, out: &mut impl Write) -> Result<()> {
        match command {
            Command::Shorten { urls, owner } => self.shorten(urls, *owner, out).await,
            Command::Resolve { id, owner } => self.resolve(id, *owner, out).await,
            Command::List { owner } => self.list(*owner, out).await,
            Command::Delete { owner, ids } => self.delete(*owner, ids, out),
            Command::Stats => self.stats(out).await,
            Command::Ping => {
                self.store.ping().await.context("store is not reachable")?;
                writeln!(out, "ok")?;
                Ok(())
            }
        }
    }

    /// Drains pending deletions, then closes the store.
    ///
    /// The store is closed even when the drain times out.
    pub async fn finish(self, drain_timeout: Duration) -> Result<DeleterStats> {
        let drained = self.deleter.shutdown(drain_timeout).await;
        self.store.close().await.context("failed to close store")?;

        let stats = drained?;
        if stats.failed_ids > 0 {
            warn!(failed_ids = stats.failed_ids, "some deletions were not applied");
        }
        Ok(stats)
    }

    async fn shorten(
        &self,
        urls: &[String],
        owner: Option<OwnerId>,
        out: &mut impl Write,
    ) -> Result<()> {
        let targets = urls
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .map(String::from)
                    .with_context(|| format!("invalid url {raw:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        if let [target] = targets.as_slice() {
            let outcome = match owner {
                Some(owner) => self.store.save_for_user(owner, target).await,
                None => self.store.save(target).await,
            }
            .context("failed to save url")?;

            if outcome.conflict {
                info!(id = %outcome.id, "url was already shortened");
            }
            writeln!(out, "{}", self.config.short_url(&outcome.id))?;
            return Ok(());
        }

        let ids = match owner {
            Some(owner) => self.store.save_batch_for_user(owner, &targets).await,
            None => self.store.save_batch(&targets).await,
        }
        .context("failed to save urls")?;

        for id in ids {
            writeln!(out, "{}", self.config.short_url(&id))?;
        }
        Ok(())
    }

    async fn resolve(&self, id: &str, owner: Option<OwnerId>, out: &mut impl Write) -> Result<()> {
        let loaded = match owner {
            Some(owner) => self.store.load_for_user(owner, id).await,
            None => self.store.load(id).await,
        };

        match loaded {
            Ok(target) => {
                writeln!(out, "{target}")?;
                Ok(())
            }
            Err(StoreError::NotFound) => Err(anyhow!("no url with id {id}")),
            Err(StoreError::Deleted) => Err(anyhow!("url {id} has been deleted")),
            Err(err) => Err(err).context("failed to load url"),
        }
    }

    async fn list(&self, owner: OwnerId, out: &mut impl Write) -> Result<()> {
        let urls = match self.store.list_for_user(owner).await {
            Ok(urls) => urls,
            Err(StoreError::NotFound) => return Err(anyhow!("owner {owner} has no urls")),
            Err(err) => return Err(err).context("failed to list urls"),
        };

        let mut urls = urls.into_iter().collect::<Vec<_>>();
        // hex and decimal ids both order by length first
        urls.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        for (id, target) in urls {
            writeln!(out, "{}\t{}", self.config.short_url(&id), target)?;
        }
        Ok(())
    }

    fn delete(&self, owner: OwnerId, ids: &[String], out: &mut impl Write) -> Result<()> {
        self.deleter
            .submit(DeletionRequest::new(owner, ids.iter().cloned()))
            .context("deletion was not accepted")?;

        writeln!(out, "accepted {} id(s) for deletion", ids.len())?;
        Ok(())
    }

    async fn stats(&self, out: &mut impl Write) -> Result<()> {
        let users = self
            .store
            .count_users()
            .await
            .context("failed to count users")?;
        let urls = self
            .store
            .count_urls()
            .await
            .context("failed to count urls")?;

        writeln!(out, "users\t{users}")?;
        writeln!(out, "urls\t{urls}")?;
        Ok(())
    }
}
