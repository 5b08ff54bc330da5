//! Cache key composition.

use std::fmt;

use url::form_urlencoded;

/// A cache key uniquely identifying a catalog request.
///
/// Format: `<namespace>:<path>[?<canonical query>]`, where the path has its
/// leading and trailing slashes trimmed and the query pairs are stably sorted
/// by key. Reordering query parameters never changes the key; changing the
/// path or any value always does.
///
/// # Examples
///
/// ```
/// use mangaproxy::cache::CacheKey;
///
/// let a = CacheKey::derive("mangadex", "/manga/", &[("limit", "10"), ("offset", "0")]);
/// let b = CacheKey::derive("mangadex", "manga", &[("offset", "0"), ("limit", "10")]);
///
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "mangadex:manga?limit=10&offset=0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `path` and `query` under `namespace`.
    pub fn derive<K, V>(namespace: &str, path: &str, query: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = normalize_path(path);
        let query = canonical_query(query);

        let mut key = String::with_capacity(namespace.len() + path.len() + query.len() + 2);
        key.push_str(namespace);
        key.push(':');
        key.push_str(path);
        if !query.is_empty() {
            key.push('?');
            key.push_str(&query);
        }
        Self(key)
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strips every leading and trailing `/` from `path`.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Serializes `pairs` as `application/x-www-form-urlencoded`, sorted by key.
///
/// The sort is stable: repeated keys such as `includes[]` keep the relative
/// order they arrived in, because that order is meaningful to the upstream.
pub fn canonical_query<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}
