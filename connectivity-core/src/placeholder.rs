// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The placeholder engine (spec §4.1): resolves `{{ ns:name }}` tokens against a set of
//! namespace-scoped resolvers injected per call.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ConnectivityError, ConnectivityErrorKind};

/// Matches `{{` WS? `ns:name` WS? `}}`, per spec §4.1. Whitespace inside the braces is
/// insignificant; `ns`/`name` exclude `{`, `}`, and whitespace so nesting can't occur.
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^:{}\s]+):([^{}\s]+)\s*\}\}").unwrap());

/// A single placeholder token, as parsed out of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The namespace prefix (e.g. `header`, `thing`, `topic`, `source`).
    pub namespace: String,
    /// The name within that namespace (e.g. `correlation-id`, `namespace`, `address`).
    pub name: String,
}

impl Token {
    /// Render back to `ns:name` form, as used in [`ConnectivityErrorKind::UnresolvedPlaceholder`].
    #[must_use]
    pub fn as_ns_name(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// A namespace-scoped lookup function: given a name within its namespace, returns the resolved
/// value, or `None` if that name is not known/available in the current context.
pub trait NamespaceResolver {
    /// Resolve `name` within this namespace.
    fn resolve(&self, name: &str) -> Option<String>;
}

impl<F> NamespaceResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, name: &str) -> Option<String> {
        self(name)
    }
}

impl NamespaceResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A set of namespace-scoped resolvers, built fresh per call (spec §9: "avoid singleton global
/// registries — inject the resolver set per call").
#[derive(Default)]
pub struct ResolverSet<'a> {
    namespaces: HashMap<String, &'a dyn NamespaceResolver>,
}

impl<'a> ResolverSet<'a> {
    /// Build an empty resolver set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for the given namespace prefix, e.g. `"header"`.
    #[must_use]
    pub fn with_namespace(mut self, prefix: &str, resolver: &'a dyn NamespaceResolver) -> Self {
        self.namespaces.insert(prefix.to_string(), resolver);
        self
    }

    fn resolve_token(&self, token: &Token) -> TokenLookup {
        match self.namespaces.get(token.namespace.as_str()) {
            None => TokenLookup::UnknownNamespace,
            Some(ns) => match ns.resolve(&token.name) {
                Some(value) => TokenLookup::Resolved(value),
                None => TokenLookup::UnresolvedName,
            },
        }
    }
}

/// The outcome of looking a [`Token`] up against a [`ResolverSet`], distinguishing a namespace
/// prefix that has no registered resolver at all from a registered namespace that simply has no
/// value for this name (spec §8 scenario 1).
enum TokenLookup {
    Resolved(String),
    UnknownNamespace,
    UnresolvedName,
}

/// How unresolved placeholders are handled during [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// An unresolved placeholder is an error (default for most template resolution).
    Strict,
    /// An unresolved placeholder is left in the output literally (spec §4.1: "used only for
    /// inbound header enrichment").
    Lenient,
    /// A token in an unregistered namespace is left literal, but a registered namespace with no
    /// value for the name is still an error (spec §8 scenario 1: target address resolution keeps
    /// an unrecognized prefix as-is rather than dropping the whole target, while remaining strict
    /// about namespaces it does know).
    KeepUnknownNamespace,
}

/// Resolve every placeholder in `template` against `resolvers`, per `mode`.
///
/// # Errors
/// In [`ResolutionMode::Strict`], returns [`ConnectivityErrorKind::UnresolvedPlaceholder`] naming
/// the first unresolvable `ns:name` token encountered.
pub fn resolve(
    template: &str,
    resolvers: &ResolverSet<'_>,
    mode: ResolutionMode,
) -> Result<String, ConnectivityError> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;
    for caps in PLACEHOLDER_PATTERN.captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let token = Token {
            namespace: caps[1].to_string(),
            name: caps[2].to_string(),
        };
        result.push_str(&template[last_end..whole.start()]);
        let unresolved = |token: &Token| {
            ConnectivityError::new(ConnectivityErrorKind::UnresolvedPlaceholder {
                token: token.as_ns_name(),
            })
            .with_property("placeholder", token.as_ns_name())
        };
        match resolvers.resolve_token(&token) {
            TokenLookup::Resolved(value) => result.push_str(&value),
            TokenLookup::UnknownNamespace => match mode {
                ResolutionMode::Lenient | ResolutionMode::KeepUnknownNamespace => {
                    result.push_str(whole.as_str());
                }
                ResolutionMode::Strict => return Err(unresolved(&token)),
            },
            TokenLookup::UnresolvedName => match mode {
                ResolutionMode::Lenient => result.push_str(whole.as_str()),
                ResolutionMode::Strict | ResolutionMode::KeepUnknownNamespace => {
                    return Err(unresolved(&token));
                }
            },
        }
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Parse every placeholder token out of `template`, without resolving them. Used by protocol
/// validators to check referenced namespaces are declared (spec §4.5).
#[must_use]
pub fn tokens(template: &str) -> Vec<Token> {
    PLACEHOLDER_PATTERN
        .captures_iter(template)
        .map(|caps| Token {
            namespace: caps[1].to_string(),
            name: caps[2].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("some/topic/{{ topic:action-subject }}", "some/topic/some-subject"; "single placeholder")]
    #[test_case("fixedAddress", "fixedAddress"; "no placeholders")]
    #[test_case("{{topic:action-subject}}/{{topic:action-subject}}", "some-subject/some-subject"; "repeated placeholder")]
    fn resolves_known_placeholders(template: &str, expected: &str) {
        let topic_ns: HashMap<String, String> =
            [("action-subject".to_string(), "some-subject".to_string())].into();
        let resolvers = ResolverSet::new().with_namespace("topic", &topic_ns);
        assert_eq!(
            resolve(template, &resolvers, ResolutionMode::Strict).unwrap(),
            expected
        );
    }

    #[test]
    fn strict_mode_errors_on_unresolved() {
        let resolvers = ResolverSet::new();
        let err = resolve(
            "some/topic/{{ eclipse:ditto }}",
            &resolvers,
            ResolutionMode::Strict,
        )
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &ConnectivityErrorKind::UnresolvedPlaceholder {
                token: "eclipse:ditto".to_string()
            }
        );
    }

    #[test]
    fn lenient_mode_keeps_literal_on_unresolved() {
        let resolvers = ResolverSet::new();
        let result = resolve(
            "some/topic/{{ eclipse:ditto }}",
            &resolvers,
            ResolutionMode::Lenient,
        )
        .unwrap();
        assert_eq!(result, "some/topic/{{ eclipse:ditto }}");
    }

    #[test]
    fn auth_context_placeholder_scenario() {
        // spec §8 scenario 4
        let mut headers = HashMap::new();
        headers.insert("correlation-id".to_string(), "C".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let resolvers = ResolverSet::new().with_namespace("header", &headers);

        let subject_a = resolve(
            "integration:{{header:correlation-id}}:hub-{{header:content-type}}",
            &resolvers,
            ResolutionMode::Strict,
        )
        .unwrap();
        assert_eq!(subject_a, "integration:C:hub-application/json");

        let subject_b = resolve(
            "integration:{{header:content-type}}:hub-{{header:correlation-id}}",
            &resolvers,
            ResolutionMode::Strict,
        )
        .unwrap();
        assert_eq!(subject_b, "integration:application/json:hub-C");
    }

    #[test]
    fn keep_unknown_namespace_mode_leaves_unknown_prefix_literal() {
        // spec §8 scenario 1: an unregistered `eclipse` prefix is kept as-is rather than erroring.
        let topic_ns: HashMap<String, String> =
            [("action-subject".to_string(), "some-subject".to_string())].into();
        let resolvers = ResolverSet::new().with_namespace("topic", &topic_ns);

        let result = resolve(
            "some/topic/{{ eclipse:ditto }}",
            &resolvers,
            ResolutionMode::KeepUnknownNamespace,
        )
        .unwrap();
        assert_eq!(result, "some/topic/{{ eclipse:ditto }}");

        let result = resolve(
            "some/topic/{{ topic:action-subject }}",
            &resolvers,
            ResolutionMode::KeepUnknownNamespace,
        )
        .unwrap();
        assert_eq!(result, "some/topic/some-subject");
    }

    #[test]
    fn keep_unknown_namespace_mode_still_errors_on_known_namespace_miss() {
        let topic_ns: HashMap<String, String> = HashMap::new();
        let resolvers = ResolverSet::new().with_namespace("topic", &topic_ns);

        let err = resolve(
            "some/topic/{{ topic:action-subject }}",
            &resolvers,
            ResolutionMode::KeepUnknownNamespace,
        )
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &ConnectivityErrorKind::UnresolvedPlaceholder {
                token: "topic:action-subject".to_string()
            }
        );
    }

    #[test]
    fn tokens_extracts_namespace_and_name() {
        let found = tokens("mqtt/topic/{{ thing:namespace }}/{{ thing:name }}");
        assert_eq!(
            found,
            vec![
                Token {
                    namespace: "thing".to_string(),
                    name: "namespace".to_string()
                },
                Token {
                    namespace: "thing".to_string(),
                    name: "name".to_string()
                },
            ]
        );
    }
}
