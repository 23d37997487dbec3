//! Tenant path helpers.
//!
//! Every thing gets its own subservice path derived from its id, and its
//! devices share it. The broker rejects most punctuation in service paths,
//! so ids are normalized before being embedded.

/// Replace every character that is not ASCII alphanumeric or `_` with `_`.
///
/// ```
/// # use iota_core::naming::normalize_id;
/// assert_eq!(normalize_id("a1-b2"), "a1_b2");
/// assert_eq!(normalize_id("abc_123"), "abc_123");
/// ```
pub fn normalize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Subservice path of a thing and its devices: `/{service}/{normalized id}`.
///
/// ```
/// # use iota_core::naming::thing_subservice;
/// assert_eq!(thing_subservice("knot", "7e13-0a"), "/knot/7e13_0a");
/// ```
pub fn thing_subservice(service: &str, thing_id: &str) -> String {
    format!("/{}/{}", service, normalize_id(thing_id))
}
