use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use futures_util::{future::BoxFuture, FutureExt as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{core::write_atomically, site::SiteProfile, Error, Result};

/// Grants and checks access to `https://{domain}/`. A `false` answer is final
/// for that call; callers do not retry.
pub trait DomainAuthorizer: Send + Sync {
    fn has_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool>;
    fn request_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool>;
    fn revoke_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool>;
}

pub fn origin_pattern(domain: &str) -> String {
    format!("https://{domain}/")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredGrants {
    #[serde(default)]
    origins: BTreeSet<String>,
}

/// Origin grants kept by the desktop host. There is no interactive prompt:
/// a request records the grant, and a failure to record it is a denial.
/// Required origins are granted from the start and cannot be revoked.
pub struct OriginGrants {
    path: Option<PathBuf>,
    required: BTreeSet<String>,
    origins: Mutex<BTreeSet<String>>,
}

impl OriginGrants {
    /// Grants stored at `path`, with the profile's default domain required.
    pub fn for_site(path: PathBuf, profile: &SiteProfile) -> Self {
        Self::load(path).with_required([profile.default_domain()])
    }

    pub fn load(path: PathBuf) -> Self {
        let origins = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoredGrants>(&content) {
                Ok(stored) => stored.origins,
                Err(error) => {
                    warn!("discarding unreadable grant file {path:?}: {error}");
                    BTreeSet::new()
                }
            },
            Err(error) => {
                debug!("no grant file at {path:?}: {error}");
                BTreeSet::new()
            }
        };

        Self {
            path: Some(path),
            required: BTreeSet::new(),
            origins: Mutex::new(origins),
        }
    }

    pub fn with_required<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.required
            .extend(domains.into_iter().map(|domain| origin_pattern(domain.as_ref())));
        self
    }

    pub fn in_memory<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: None,
            required: BTreeSet::new(),
            origins: Mutex::new(
                domains
                    .into_iter()
                    .map(|domain| origin_pattern(domain.as_ref()))
                    .collect(),
            ),
        }
    }

    fn contains(&self, domain: &str) -> bool {
        let origin = origin_pattern(domain);
        self.required.contains(&origin)
            || self
                .origins
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&origin)
    }

    fn update(&self, change: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<bool> {
        let mut origins = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = origins.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            let content = serde_json::to_string_pretty(&StoredGrants {
                origins: next.clone(),
            })
            .map_err(|error| Error::Storage(format!("Failed to serialize grants: {error}")))?;
            write_atomically(path, &content)?;
        }
        *origins = next;
        Ok(true)
    }
}

impl DomainAuthorizer for OriginGrants {
    fn has_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        async move { self.contains(domain) }.boxed()
    }

    fn request_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        async move {
            if self.contains(domain) {
                return true;
            }
            match self.update(|origins| origins.insert(origin_pattern(domain))) {
                Ok(_) => {
                    info!("granted access to {}", origin_pattern(domain));
                    true
                }
                Err(error) => {
                    warn!("failed to record grant for {domain}: {error}");
                    false
                }
            }
        }
        .boxed()
    }

    fn revoke_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        async move {
            if self.required.contains(&origin_pattern(domain)) {
                warn!("refusing to revoke required origin {}", origin_pattern(domain));
                return false;
            }
            match self.update(|origins| origins.remove(&origin_pattern(domain))) {
                Ok(removed) => {
                    if removed {
                        info!("revoked access to {}", origin_pattern(domain));
                    }
                    removed
                }
                Err(error) => {
                    warn!("failed to revoke grant for {domain}: {error}");
                    false
                }
            }
        }
        .boxed()
    }
}
