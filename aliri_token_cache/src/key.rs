//! Cache keys and token requests

use std::{fmt, sync::Arc};

use crate::{Scope, ScopeRef, TenantId, TenantIdRef};

/// The identity under which a token is cached and single-flighted
///
/// Scopes are sorted and deduplicated, so two keys built from the same set of
/// scopes in a different order, or with repeats, are equal. A tenant or
/// claims qualifier makes the key distinct from the unqualified one.
///
/// Cloning a key is a reference count increment.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<KeyParts>);

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct KeyParts {
    scopes: Box<[Scope]>,
    tenant: Option<TenantId>,
    claims: Option<Box<str>>,
}

impl CacheKey {
    /// Derives a key from a set of scopes
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        let mut scopes: Vec<Scope> = scopes.into_iter().map(Into::into).collect();
        scopes.sort_unstable();
        scopes.dedup();

        Self(Arc::new(KeyParts {
            scopes: scopes.into_boxed_slice(),
            tenant: None,
            claims: None,
        }))
    }

    /// Qualifies the key with a tenant
    pub fn with_tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        Arc::make_mut(&mut self.0).tenant = Some(tenant.into());
        self
    }

    /// Qualifies the key with an additional claims challenge
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.0).claims = Some(claims.into().into_boxed_str());
        self
    }

    /// The normalized scopes, in sorted order
    #[inline]
    pub fn scopes(&self) -> &[Scope] {
        &self.0.scopes
    }

    /// The tenant qualifier, if any
    #[inline]
    pub fn tenant(&self) -> Option<&TenantIdRef> {
        self.0.tenant.as_deref()
    }

    /// The claims qualifier, if any
    #[inline]
    pub fn claims(&self) -> Option<&str> {
        self.0.claims.as_deref()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in self.scopes() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(scope.as_str())?;
        }

        if let Some(tenant) = self.tenant() {
            write!(f, " @{}", tenant)?;
        }

        if self.claims().is_some() {
            f.write_str(" +claims")?;
        }

        Ok(())
    }
}

/// A request for a token
///
/// Describes what the token is for and whether the caller wants to bypass the
/// cached token. The [`CacheKey`] is derived once, when the request is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequest {
    key: CacheKey,
    force_refresh: bool,
}

impl TokenRequest {
    /// Constructs a request for a token covering `scopes`
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        Self::from_key(CacheKey::new(scopes))
    }

    /// Constructs a request for the token cached under `key`
    pub fn from_key(key: CacheKey) -> Self {
        Self {
            key,
            force_refresh: false,
        }
    }

    /// Qualifies the request with a tenant
    pub fn with_tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        self.key = self.key.with_tenant(tenant);
        self
    }

    /// Qualifies the request with an additional claims challenge
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        self.key = self.key.with_claims(claims);
        self
    }

    /// Requests that the cached token be bypassed
    ///
    /// Used when the caller knows the cached token was rejected, such as after
    /// the server responded with `401 Unauthorized`.
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Whether the cached token should be bypassed
    #[inline]
    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }

    /// The key that this request's token is cached under
    #[inline]
    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    /// The normalized scopes being requested
    #[inline]
    pub fn scopes(&self) -> &[Scope] {
        self.key.scopes()
    }

    /// The tenant qualifier, if any
    #[inline]
    pub fn tenant(&self) -> Option<&TenantIdRef> {
        self.key.tenant()
    }

    /// The claims qualifier, if any
    #[inline]
    pub fn claims(&self) -> Option<&str> {
        self.key.claims()
    }

    /// Whether the request covers the given scope
    pub fn has_scope(&self, scope: &ScopeRef) -> bool {
        self.scopes()
            .binary_search_by(|s| s.as_str().cmp(scope.as_str()))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_order() {
        assert_eq!(CacheKey::new(["a", "b"]), CacheKey::new(["b", "a"]));
    }

    #[test]
    fn key_distinguishes_subsets() {
        assert_ne!(CacheKey::new(["a"]), CacheKey::new(["a", "b"]));
    }

    #[test]
    fn key_ignores_duplicates() {
        assert_eq!(CacheKey::new(["a", "b", "a"]), CacheKey::new(["b", "a"]));
    }

    #[test]
    fn qualifiers_make_keys_distinct() {
        let plain = CacheKey::new(["https://vault.example/.default"]);
        let tenant = plain.clone().with_tenant("contoso");
        let claims = plain.clone().with_claims(r#"{"access_token":{"nbf":{"essential":true}}}"#);

        assert_ne!(plain, tenant);
        assert_ne!(plain, claims);
        assert_ne!(tenant, claims);
        assert_eq!(tenant, plain.with_tenant("contoso"));
    }

    #[test]
    fn qualifying_a_shared_key_leaves_the_original_alone() {
        let plain = CacheKey::new(["a"]);
        let shared = plain.clone();
        let qualified = shared.with_tenant("t");

        assert_eq!(plain.tenant(), None);
        assert_eq!(qualified.tenant().map(|t| t.as_str()), Some("t"));
    }

    #[test]
    fn display_lists_sorted_scopes_and_qualifiers() {
        let key = CacheKey::new(["write", "read"]).with_tenant("acme").with_claims("{}");
        assert_eq!(key.to_string(), "read write @acme +claims");
    }

    #[test]
    fn request_exposes_normalized_scopes() {
        let request = TokenRequest::new(["b", "a", "b"]).force_refresh();

        let scopes: Vec<&str> = request.scopes().iter().map(|s| s.as_str()).collect();
        assert_eq!(scopes, ["a", "b"]);
        assert!(request.is_force_refresh());
        assert!(request.has_scope(ScopeRef::from_static("a")));
        assert!(!request.has_scope(ScopeRef::from_static("c")));
    }

    #[test]
    fn force_refresh_does_not_change_the_key() {
        let plain = TokenRequest::new(["a"]);
        let forced = plain.clone().force_refresh();
        assert_eq!(plain.cache_key(), forced.cache_key());
    }
}
