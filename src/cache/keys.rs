//! Cache key derivation.
//!
//! A key is the SHA-256 digest of a length-prefixed encoding of the endpoint
//! identity and every validated parameter. The encoding is independent of
//! the process, so keys stay stable across restarts.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::application::request::{CatalogRequest, ParamValue};

const KEY_SCHEMA: &[u8] = b"catalog-response/v1";
const TAG_TEXT: u8 = 0x01;
const TAG_INT: u8 = 0x02;

/// Identity of one logical request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for a validated request. Parameters are hashed in name
    /// order, so two requests with the same values always collide and
    /// nothing else (request ids, timestamps) can leak in.
    pub fn build(request: &CatalogRequest) -> Self {
        let mut params = request.params();
        params.sort_by_key(|(name, _)| *name);

        let mut hasher = Sha256::new();
        hasher.update(KEY_SCHEMA);
        write_bytes(&mut hasher, request.endpoint().as_str().as_bytes());
        hasher.update((params.len() as u64).to_be_bytes());

        for (name, value) in params {
            write_bytes(&mut hasher, name.as_bytes());
            match value {
                ParamValue::Text(text) => {
                    hasher.update([TAG_TEXT]);
                    write_bytes(&mut hasher, text.as_bytes());
                }
                ParamValue::Int(int) => {
                    hasher.update([TAG_INT]);
                    hasher.update(int.to_be_bytes());
                }
            }
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_digest(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Stable shard selector for lock striping.
    pub(crate) fn shard(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_be_bytes(prefix) % shards.max(1) as u64) as usize
    }
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::application::pagination::PageWindow;
    use crate::application::request::{BrowseParams, MovieParams, SearchParams};

    fn search(keyword: &str, page: u32, page_size: u32) -> CatalogRequest {
        CatalogRequest::Search(SearchParams {
            keyword: keyword.to_string(),
            window: PageWindow::new(page, page_size),
        })
    }

    fn browse(category_id: i64, page: u32, page_size: u32) -> CatalogRequest {
        CatalogRequest::BrowseByCategory(BrowseParams {
            category_id,
            window: PageWindow::new(page, page_size),
        })
    }

    #[test]
    fn same_request_yields_same_key() {
        let a = CacheKey::build(&search("drama", 1, 10));
        let b = CacheKey::build(&search("drama", 1, 10));
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn key_is_stable_across_processes() {
        let key = CacheKey::build(&CatalogRequest::ListCategories);
        assert_eq!(key.to_hex().len(), 64);
        assert_eq!(key, CacheKey::build(&CatalogRequest::ListCategories));
    }

    #[test]
    fn endpoints_never_share_keys() {
        let by_id = CacheKey::build(&CatalogRequest::GetById(MovieParams { id: 4 }));
        let category = CacheKey::build(&browse(4, 1, 1));
        let listing = CacheKey::build(&CatalogRequest::ListCategories);
        let main = CacheKey::build(&CatalogRequest::ListMainCategories);

        let keys: HashSet<_> = [by_id, category, listing, main].into_iter().collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn every_parameter_changes_the_key() {
        let base = CacheKey::build(&search("drama", 1, 10));
        assert_ne!(base, CacheKey::build(&search("Drama", 1, 10)));
        assert_ne!(base, CacheKey::build(&search("drama", 2, 10)));
        assert_ne!(base, CacheKey::build(&search("drama", 1, 11)));
    }

    #[test]
    fn length_prefixing_prevents_concatenation_collisions() {
        let a = CacheKey::build(&search("ab", 1, 1));
        let b = CacheKey::build(&search("a", 1, 1));
        let c = CacheKey::build(&search("a\u{0}", 1, 1));
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn distinct_requests_produce_distinct_keys() {
        let mut keys = HashSet::new();
        let mut requests = 0;
        for page in 1..=5 {
            for size in 1..=5 {
                for keyword in ["a", "b", "drama", "1"] {
                    keys.insert(CacheKey::build(&search(keyword, page, size)));
                    requests += 1;
                }
                for category in 1..=3 {
                    keys.insert(CacheKey::build(&browse(category, page, size)));
                    requests += 1;
                }
            }
        }
        assert_eq!(keys.len(), requests);
    }

    #[test]
    fn shard_is_within_bounds() {
        let key = CacheKey::build(&search("x", 1, 1));
        for shards in [1, 2, 16, 31] {
            assert!(key.shard(shards) < shards);
        }
        assert_eq!(key.shard(0), 0);
    }
}
