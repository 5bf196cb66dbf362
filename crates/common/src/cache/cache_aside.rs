use crate::cache::MetadataCache;
use crate::domain::DomainResult;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Positional arguments that contribute to a cache key
pub trait CacheKeyArgs {
    fn key_parts(&self) -> Vec<String>;
}

impl CacheKeyArgs for () {
    fn key_parts(&self) -> Vec<String> {
        Vec::new()
    }
}

macro_rules! impl_cache_key_args {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Display),+> CacheKeyArgs for ($($name,)+) {
            fn key_parts(&self) -> Vec<String> {
                vec![$(self.$idx.to_string()),+]
            }
        }
    };
}

impl_cache_key_args!(A 0);
impl_cache_key_args!(A 0, B 1);
impl_cache_key_args!(A 0, B 1, C 2);

/// `prefix` alone without args, otherwise `prefix:arg1:arg2`
pub fn cache_key<A: CacheKeyArgs + ?Sized>(prefix: &str, args: &A) -> String {
    let parts = args.key_parts();
    if parts.is_empty() {
        prefix.to_string()
    } else {
        format!("{}:{}", prefix, parts.join(":"))
    }
}

type Loader<A, T> = Box<dyn Fn(A) -> BoxFuture<'static, DomainResult<Option<T>>> + Send + Sync>;

/// A read-only loader wrapped with read-through caching
pub struct CachedLoader<A, T> {
    cache: MetadataCache,
    prefix: String,
    ttl: Duration,
    loader: Loader<A, T>,
}

/// Wrap `loader` so results are served from `cache` under keys derived from
/// `prefix` and the call arguments.
pub fn cache_aside<A, T, F, Fut>(
    cache: MetadataCache,
    prefix: impl Into<String>,
    ttl: Duration,
    loader: F,
) -> CachedLoader<A, T>
where
    A: CacheKeyArgs,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DomainResult<Option<T>>> + Send + 'static,
{
    CachedLoader {
        cache,
        prefix: prefix.into(),
        ttl,
        loader: Box::new(move |args| Box::pin(loader(args))),
    }
}

impl<A, T> CachedLoader<A, T>
where
    A: CacheKeyArgs,
    T: Serialize + DeserializeOwned,
{
    pub fn key(&self, args: &A) -> String {
        cache_key(&self.prefix, args)
    }

    /// Cached value on a hit; otherwise call the loader once and cache a
    /// `Some` result before returning it.
    pub async fn load(&self, args: A) -> DomainResult<Option<T>> {
        let key = self.key(&args);
        if let Some(cached) = self.cache.get::<T>(&key).await {
            return Ok(Some(cached));
        }

        let loaded = (self.loader)(args).await?;
        match &loaded {
            Some(value) => {
                self.cache.set(&key, value, Some(self.ttl)).await;
            }
            None => debug!(key = %key, "loader returned nothing, not caching"),
        }
        Ok(loaded)
    }
}
