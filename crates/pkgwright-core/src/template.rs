//! Output filename templates.
//!
//! A template is plain text with `%{TAG}` references, resolved against a
//! package header. Tag names are matched case-insensitively and `%%` is a
//! literal percent sign.

use std::path::{Component, Path};

use pkgwright_schema::{Header, Tag};
use thiserror::Error;

/// Default binary package filename.
pub const DEFAULT_BINARY_TEMPLATE: &str = "%{ARCH}/%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}.rpm";

/// Rendered in place of a tag the header does not carry.
pub const MISSING_TAG: &str = "(none)";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown tag {name:?} in filename template {template:?}")]
    UnknownTag { name: String, template: String },

    #[error("unterminated %{{ in filename template {0:?}")]
    Unterminated(String),

    #[error("filename template {0:?} rendered to an empty name")]
    Empty(String),

    #[error("filename template rendered {0:?}, which leaves the package directory")]
    Escapes(String),
}

/// Render `template` against `header`.
///
/// The result is a path relative to the package directory. Absolute results
/// and results with `..` components are rejected.
pub fn render(template: &str, header: &Header) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            out.push('%');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let close = body
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
            let name = &body[..close];
            let tag = Tag::from_name(name).ok_or_else(|| TemplateError::UnknownTag {
                name: name.to_string(),
                template: template.to_string(),
            })?;
            match header.get(tag) {
                Some(value) => out.push_str(&value.to_string()),
                None => out.push_str(MISSING_TAG),
            }
            rest = &body[close + 1..];
        } else {
            out.push('%');
            rest = after;
        }
    }
    out.push_str(rest);

    if out.is_empty() {
        return Err(TemplateError::Empty(template.to_string()));
    }
    let escapes = Path::new(&out).components().any(|c| {
        matches!(
            c,
            Component::RootDir | Component::Prefix(_) | Component::ParentDir
        )
    });
    if escapes {
        return Err(TemplateError::Escapes(out));
    }
    Ok(out)
}
