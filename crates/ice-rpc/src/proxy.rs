//! [`Proxy`]: the opaque handle applications hold, parameterized by an
//! interface type-id (spec.md §4.6 "Reference, Proxy, and Request
//! Handler"). A proxy is cheap to clone (an `Arc<Reference>` plus a
//! type-id) and every configuration method returns a new proxy sharing
//! the old, unmodified reference.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ice_core::encoding::VersionPair;
use ice_core::{Context, Identity, LocalError};
use ice_transport::Endpoint;

use crate::reference::{EndpointSelection, InvocationMode, LocatorCacheTtl, Reference};

/// Opaque invocation handle: a reference plus the interface type-id used
/// by `checked_cast` (spec.md §4.6). `type_id` is `None` for a proxy
/// obtained from `stringToProxy`/an unchecked cast, before the caller has
/// asserted which interface it implements.
#[derive(Clone, Debug)]
pub struct Proxy {
    reference: Arc<Reference>,
    type_id: Option<Arc<str>>,
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        *self.reference == *other.reference
    }
}

impl Proxy {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference: Arc::new(reference),
            type_id: None,
        }
    }

    pub fn reference(&self) -> &Arc<Reference> {
        &self.reference
    }

    pub fn identity(&self) -> &Identity {
        &self.reference.identity
    }

    pub fn type_id(&self) -> Option<&str> {
        self.type_id.as_deref()
    }

    /// Asserts this proxy implements `type_id` without any remote
    /// verification (`ice_uncheckedCast` in spirit; the actual `isA`
    /// round-trip belongs to the dispatch pipeline, not this type).
    pub fn unchecked_cast(&self, type_id: impl Into<Arc<str>>) -> Self {
        Self {
            reference: self.reference.clone(),
            type_id: Some(type_id.into()),
        }
    }

    fn with_reference(&self, reference: Reference) -> Self {
        Self {
            reference: Arc::new(reference),
            type_id: self.type_id.clone(),
        }
    }

    // --- copy-on-modify configuration (spec.md §4.6) ---

    pub fn twoway(&self) -> Self {
        self.with_reference(self.reference.with_mode(InvocationMode::Twoway))
    }
    pub fn oneway(&self) -> Self {
        self.with_reference(self.reference.with_mode(InvocationMode::Oneway))
    }
    pub fn batch_oneway(&self) -> Self {
        self.with_reference(self.reference.with_mode(InvocationMode::BatchOneway))
    }
    pub fn datagram(&self) -> Self {
        self.with_reference(self.reference.with_mode(InvocationMode::Datagram))
    }
    pub fn batch_datagram(&self) -> Self {
        self.with_reference(self.reference.with_mode(InvocationMode::BatchDatagram))
    }
    pub fn secure(&self, secure: bool) -> Self {
        self.with_reference(self.reference.with_secure(secure))
    }
    pub fn facet(&self, facet: impl Into<Arc<str>>) -> Self {
        self.with_reference(self.reference.with_facet(facet))
    }
    pub fn context(&self, context: Context) -> Self {
        self.with_reference(self.reference.with_context(context))
    }
    pub fn invocation_timeout(&self, timeout: Duration) -> Self {
        self.with_reference(self.reference.with_invocation_timeout(Some(timeout)))
    }
    pub fn prefer_secure(&self, prefer_secure: bool) -> Self {
        self.with_reference(self.reference.with_prefer_secure(prefer_secure))
    }
    pub fn endpoint_selection(&self, selection: EndpointSelection) -> Self {
        self.with_reference(self.reference.with_endpoint_selection(selection))
    }
    pub fn encoding_version(&self, version: VersionPair) -> Self {
        self.with_reference(self.reference.with_encoding_version(version))
    }
    pub fn locator_cache_ttl(&self, ttl: LocatorCacheTtl) -> Self {
        self.with_reference(self.reference.with_locator_cache_ttl(ttl))
    }
    pub fn locator(&self, locator: Option<Proxy>) -> Self {
        self.with_reference(self.reference.with_locator(locator.map(|p| p.reference)))
    }
    pub fn router(&self, router: Option<Proxy>) -> Self {
        self.with_reference(self.reference.with_router(router.map(|p| p.reference)))
    }

    // --- stringified form (spec.md §6 "Stringified proxy grammar") ---

    pub fn to_string_form(&self) -> String {
        let r = &self.reference;
        let mut out = r.identity.to_string_form();
        out.push(' ');
        out.push_str(r.mode.option_letter());
        if r.secure {
            out.push_str(" -s");
        }
        if !r.facet.is_empty() {
            out.push_str(" -f ");
            out.push_str(&escape_option(&r.facet));
        }
        out.push_str(&format!(
            " -e {}.{} -p {}.{}",
            r.encoding_version.major, r.encoding_version.minor, r.protocol_version.major, r.protocol_version.minor
        ));
        match &r.target {
            crate::reference::ReferenceTarget::Direct(endpoints) => {
                for endpoint in endpoints.iter() {
                    out.push(':');
                    out.push_str(&endpoint.to_string_form());
                }
            }
            crate::reference::ReferenceTarget::Indirect { adapter_id } => {
                out.push_str(" @");
                out.push_str(&escape_option(adapter_id));
            }
            crate::reference::ReferenceTarget::Fixed(_) => {
                // A fixed reference is pinned to a live connection that has
                // no stringified form of its own (spec.md §3): there is
                // nothing meaningful to round-trip here.
            }
        }
        out
    }

    /// Parses the grammar in spec.md §6. Endpoints are split on `:` only
    /// outside of the leading identity/option segment, matching the
    /// original grammar's `endpoints := (':' endpoint)+`.
    pub fn parse(text: &str) -> Result<Self, LocalError> {
        let (head, endpoint_segments) = split_head_and_endpoints(text)?;
        let mut tokens = head.split_whitespace();
        let identity_token = tokens
            .next()
            .ok_or_else(|| LocalError::Other("empty stringified proxy".into()))?;
        let identity = Identity::parse(identity_token)?;

        let mut mode = InvocationMode::Twoway;
        let mut secure = false;
        let mut facet = Arc::from("");
        let mut encoding_version = ice_core::encoding::ENCODING_VERSION;
        let mut protocol_version = ice_core::encoding::PROTOCOL_VERSION;
        let mut adapter_id: Option<Arc<str>> = None;

        let remaining: Vec<&str> = tokens.collect();
        let mut i = 0;
        while i < remaining.len() {
            match remaining[i] {
                opt @ ("-t" | "-o" | "-O" | "-d" | "-D") => {
                    mode = InvocationMode::from_option_letter(opt).expect("matched above");
                }
                "-s" => secure = true,
                "-f" => {
                    i += 1;
                    let raw = remaining
                        .get(i)
                        .ok_or_else(|| LocalError::Other("-f missing facet value".into()))?;
                    facet = Arc::from(unescape_option(raw)?);
                }
                "-e" => {
                    i += 1;
                    let raw = remaining
                        .get(i)
                        .ok_or_else(|| LocalError::Other("-e missing version".into()))?;
                    encoding_version = parse_version_pair(raw)?;
                }
                "-p" => {
                    i += 1;
                    let raw = remaining
                        .get(i)
                        .ok_or_else(|| LocalError::Other("-p missing version".into()))?;
                    protocol_version = parse_version_pair(raw)?;
                }
                other if other.starts_with('@') => {
                    adapter_id = Some(Arc::from(unescape_option(&other[1..])?));
                }
                other => return Err(LocalError::Other(format!("unrecognized proxy option `{other}`"))),
            }
            i += 1;
        }

        let target = if let Some(adapter_id) = adapter_id {
            crate::reference::ReferenceTarget::Indirect { adapter_id }
        } else {
            let mut endpoints = Vec::with_capacity(endpoint_segments.len());
            for segment in &endpoint_segments {
                let mut parts = segment.split_whitespace();
                let transport = parts
                    .next()
                    .ok_or_else(|| LocalError::Other("empty endpoint segment".into()))?;
                let rest: Vec<&str> = parts.collect();
                endpoints.push(Endpoint::parse(transport, &rest)?);
            }
            crate::reference::ReferenceTarget::Direct(Arc::from(endpoints))
        };

        let reference = Reference {
            identity,
            facet,
            mode,
            secure,
            protocol_version,
            encoding_version,
            target,
            invocation_timeout: None,
            locator_cache_ttl: LocatorCacheTtl::Forever,
            context: Context::new(),
            prefer_secure: false,
            endpoint_selection: EndpointSelection::Ordered,
            locator: None,
            router: None,
        };
        Ok(Proxy {
            reference: Arc::new(reference),
            type_id: None,
        })
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_form())
    }
}

/// Splits a stringified proxy into its `identity (' ' option)*` head and
/// the list of `:`-separated endpoint segments, respecting that a `:`
/// inside a `-f`/`@` escaped value is not a separator (none of the escape
/// forms used here ever produce a literal unescaped `:`, so a naive split
/// is safe once we stop at the first token that looks like an endpoint
/// list: endpoints only ever appear after all proxy options, so we scan
/// left to right and treat everything from the first top-level `:` as the
/// endpoint list).
fn split_head_and_endpoints(text: &str) -> Result<(&str, Vec<&str>), LocalError> {
    match text.find(':') {
        None => Ok((text, Vec::new())),
        Some(idx) => {
            let head = &text[..idx];
            let rest = &text[idx + 1..];
            let segments = rest.split(':').collect();
            Ok((head, segments))
        }
    }
}

fn parse_version_pair(raw: &str) -> Result<VersionPair, LocalError> {
    let (major, minor) = raw
        .split_once('.')
        .ok_or_else(|| LocalError::Other(format!("invalid version `{raw}`")))?;
    let major: u8 = major
        .parse()
        .map_err(|_| LocalError::Other(format!("invalid version `{raw}`")))?;
    let minor: u8 = minor
        .parse()
        .map_err(|_| LocalError::Other(format!("invalid version `{raw}`")))?;
    Ok(VersionPair::new(major, minor))
}

fn escape_option(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == ' ' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape_option(value: &str) -> Result<String, LocalError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => return Err(LocalError::Other("dangling escape in proxy option".into())),
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ice_transport::endpoint::HostParams;

    fn sample_proxy() -> Proxy {
        let identity = Identity::new("widget", "toys").unwrap();
        let endpoint = Endpoint::Known {
            kind: ice_transport::EndpointKind::Tcp,
            params: HostParams {
                host: Arc::from("localhost"),
                port: 4061,
                connection_timeout: Duration::from_secs(10),
                resource: Arc::from(""),
            },
        };
        Proxy::new(Reference::direct(identity, vec![endpoint]))
    }

    #[test]
    fn round_trips_a_direct_proxy() {
        let proxy = sample_proxy();
        let text = proxy.to_string_form();
        let parsed = Proxy::parse(&text).unwrap();
        assert_eq!(proxy, parsed);
    }

    #[test]
    fn round_trips_an_indirect_proxy() {
        let identity = Identity::new("widget", "toys").unwrap();
        let proxy = Proxy::new(Reference::indirect(identity, "WidgetAdapter"));
        let text = proxy.to_string_form();
        let parsed = Proxy::parse(&text).unwrap();
        assert_eq!(proxy, parsed);
    }

    #[test]
    fn preserves_an_opaque_endpoint_byte_for_byte() {
        let text = "widget -t -e 1.1 -p 1.0:opaque -t 99 -e 1.0 -v AAECAw==";
        let parsed = Proxy::parse(text).unwrap();
        assert_eq!(parsed.to_string_form(), text);
    }

    #[test]
    fn oneway_changes_mode_without_mutating_the_original() {
        let proxy = sample_proxy();
        let oneway = proxy.oneway();
        assert!(proxy.reference().mode.is_twoway());
        assert!(!oneway.reference().mode.is_twoway());
    }
}
