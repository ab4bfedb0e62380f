//! Placeholder tokens embedded in literal values
//!
//! Deferred values may be formatted into strings before they are known:
//! `{chat.bindings.http.url}` for an endpoint, `{FoundryProjectUrl.value}`
//! for a parameter. The projector substitutes every token it finds.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::endpoint::EndpointProperty;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r"\{([A-Za-z0-9_-]+)\.(?:bindings\.([A-Za-z0-9_-]+)\.(url|host|port|hostport|scheme|targetPort)|value)\}",
    )
    .expect("valid regex")
});

/// A deferred value named by a placeholder token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `{<name>.value}`
    Parameter(String),
    /// `{<owner>.bindings.<endpoint>.<property>}`
    Endpoint {
        owner: String,
        endpoint: String,
        property: EndpointProperty,
    },
}

fn from_captures(caps: &Captures<'_>) -> Token {
    let name = caps[1].to_string();
    match (caps.get(2), caps.get(3)) {
        (Some(endpoint), Some(property)) => Token::Endpoint {
            owner: name,
            endpoint: endpoint.as_str().to_string(),
            property: property
                .as_str()
                .parse()
                .unwrap_or(EndpointProperty::Url),
        },
        _ => Token::Parameter(name),
    }
}

/// All tokens in `text`, in order of appearance
pub fn scan(text: &str) -> Vec<Token> {
    TOKEN_RE.captures_iter(text).map(|c| from_captures(&c)).collect()
}

/// Replace every token in `text` using `resolve`
///
/// Stops at the first token that fails to resolve.
pub fn substitute<E, F>(text: &str, mut resolve: F) -> Result<String, E>
where
    F: FnMut(&Token) -> Result<String, E>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TOKEN_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&resolve(&from_captures(&caps))?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
