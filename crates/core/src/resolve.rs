use crate::domain::recipient::Recipient;
use crate::store::RecordStore;
use anyhow::Context;

pub const DEFAULT_COLLECTION: &str = "users";
pub const DEFAULT_TARGET_USER_ID: &str = "owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Well-known identifier only.
    Direct,
    /// Well-known identifier, then the first usable record of a full scan.
    Fallback,
}

impl ResolutionStrategy {
    pub fn parse(v: Option<&str>) -> Self {
        match v.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("direct") => ResolutionStrategy::Direct,
            _ => ResolutionStrategy::Fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    Direct,
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub recipient: Recipient,
    pub tier: ResolutionTier,
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub collection: String,
    pub target_id: String,
    pub strategy: ResolutionStrategy,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            target_id: DEFAULT_TARGET_USER_ID.to_string(),
            strategy: ResolutionStrategy::Fallback,
        }
    }
}

impl ResolverOptions {
    pub fn from_env(target_id: Option<&str>) -> Self {
        let mut out = Self::default();
        if let Some(c) = crate::config::env_string("USERS_COLLECTION") {
            out.collection = c;
        }
        if let Some(id) = target_id.filter(|s| !s.trim().is_empty()) {
            out.target_id = id.trim().to_string();
        }
        out.strategy =
            ResolutionStrategy::parse(crate::config::env_string("RESOLUTION_STRATEGY").as_deref());
        out
    }
}

pub struct Resolver<'a> {
    store: &'a dyn RecordStore,
    opts: ResolverOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn RecordStore, opts: ResolverOptions) -> Self {
        Self { store, opts }
    }

    /// `Ok(None)` when no record carries a destination. Store errors propagate: the run must
    /// not guess a recipient.
    pub async fn resolve(&self) -> anyhow::Result<Option<Resolved>> {
        let collection = self.opts.collection.as_str();
        let target_id = self.opts.target_id.as_str();

        let direct = self
            .store
            .get(collection, target_id)
            .await
            .with_context(|| format!("{} lookup of {collection}/{target_id} failed", self.store.store_name()))?;

        match direct {
            Some(record) => match record.into_recipient() {
                Some(recipient) => {
                    return Ok(Some(Resolved {
                        recipient,
                        tier: ResolutionTier::Direct,
                    }))
                }
                None => {
                    tracing::warn!(%target_id, "target record has no destination field populated")
                }
            },
            None => tracing::warn!(%target_id, "target record not found"),
        }

        if self.opts.strategy == ResolutionStrategy::Direct {
            return Ok(None);
        }

        let records = self
            .store
            .scan(collection)
            .await
            .with_context(|| format!("{} scan of {collection} failed", self.store.store_name()))?;
        let scanned = records.len();

        let found = records
            .into_iter()
            .find_map(|r| r.into_recipient())
            .map(|recipient| Resolved {
                recipient,
                tier: ResolutionTier::Scan,
            });

        if found.is_none() {
            tracing::warn!(collection, scanned, "no record with a destination field found");
        }
        Ok(found)
    }
}
