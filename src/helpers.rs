//! Resource-building helpers.

// ============================================================================
// Imports
// ============================================================================

use urlencoding::encode;

// ============================================================================
// URL Components
// ============================================================================

/// Fills the `{}` placeholders of `template` with path-escaped `args`.
///
/// Each argument is percent-encoded as a single path segment, so a `/` or
/// `?` inside an argument cannot change the shape of the resource.
/// Placeholders beyond the last argument are left as they are; surplus
/// arguments are ignored.
///
/// # Example
///
/// ```
/// use wsrest::url_component_encode;
///
/// let resource = url_component_encode("/users/{}/files/{}", &["bob smith", "a/b.txt"]);
/// assert_eq!(resource, "/users/bob%20smith/files/a%2Fb.txt");
/// ```
#[must_use]
pub fn url_component_encode(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;

    while let Some(index) = rest.find("{}") {
        out.push_str(&rest[..index]);
        match args.next() {
            Some(arg) => out.push_str(&encode(arg)),
            None => out.push_str("{}"),
        }
        rest = &rest[index + 2..];
    }
    out.push_str(rest);

    out
}

// ============================================================================
// Tests
// ============================================================================
