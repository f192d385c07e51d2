//! Namespace helper for qualified capability names.
//!
//! Backends that opt into namespacing expose their tools and prompts as
//! `"backend/name"`.

/// Separator between a backend namespace and a capability name
pub const NAMESPACE_SEPARATOR: char = '/';

/// Prepend `"namespace/"` to a name, or return the name unchanged when
/// `namespace` is `None`.
///
/// ```
/// # use relay_core::routing::qualified_name;
/// assert_eq!(qualified_name("search", Some("web")), "web/search");
/// assert_eq!(qualified_name("search", None), "search");
/// ```
pub fn qualified_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}{}{}", ns, NAMESPACE_SEPARATOR, name),
        None => name.to_string(),
    }
}
