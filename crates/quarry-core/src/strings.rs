//! String helpers: `%(field)s` interpolation, compound extension splitting
//! and rename-rule parsing.

use crate::error::{Error, Result};
use crate::record::Record;
use indexmap::IndexMap;

/// Expand `%(field)s` placeholders against a record.
///
/// `%%` produces a literal percent sign. Any other use of `%` is rejected so
/// typos do not silently leak into file names or URLs.
///
/// # Examples
///
/// ```
/// use quarry_core::{Record, interpolate};
///
/// let record = Record::from([("dataset", "pvc-1")]);
/// assert_eq!(interpolate("%(dataset)s.tgz", &record).unwrap(), "pvc-1.tgz");
/// ```
pub fn interpolate(template: &str, record: &Record) -> Result<String> {
    let invalid = |reason: &str| Error::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            out.push('%');
            rest = tail;
            continue;
        }

        let Some(body) = after.strip_prefix('(') else {
            return Err(invalid("'%' must be followed by '(field)s' or '%'"));
        };
        let close = body
            .find(')')
            .ok_or_else(|| invalid("unterminated placeholder"))?;
        let field = &body[..close];
        let tail = body[close + 1..]
            .strip_prefix('s')
            .ok_or_else(|| invalid("placeholder must end with ')s'"))?;

        let value = record.get(field).ok_or_else(|| Error::MissingField {
            field: field.to_string(),
        })?;
        out.push_str(&value.to_string());
        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

/// Longest extension component still treated as part of a compound extension.
const MAX_EXT_COMPONENT: usize = 4;

/// Split a file name into `(stem, extension)` with compound-extension support.
///
/// Extension components are collected right to left while each is at most
/// four characters long; the first longer component ends the extension.
///
/// ```
/// use quarry_core::split_ext;
///
/// assert_eq!(split_ext("file.tar.gz"), ("file", ".tar.gz"));
/// assert_eq!(split_ext("file.toolong.gz"), ("file.toolong", ".gz"));
/// ```
pub fn split_ext(filename: &str) -> (&str, &str) {
    let mut split_at = filename.len();
    let mut search_end = filename.len();

    while let Some(dot) = filename[..search_end].rfind('.') {
        if dot == 0 {
            break;
        }
        let component = &filename[dot + 1..search_end];
        if component.len() > MAX_EXT_COMPONENT {
            break;
        }
        split_at = dot;
        search_end = dot;
    }

    filename.split_at(split_at)
}

/// Parse rename rules into an ordered `pattern -> replacement` map.
///
/// Each rule is a string whose first character is the separator, e.g.
/// `"/\.mat$/.h5"` or `"|old|new"`.
pub fn parse_rename_rules<S: AsRef<str>>(rules: &[S]) -> Result<IndexMap<String, String>> {
    let mut pairs = IndexMap::new();
    for rule in rules {
        let rule = rule.as_ref();
        let mut chars = rule.chars();
        let Some(sep) = chars.next() else {
            return Err(Error::InvalidRenameRule {
                rule: rule.to_string(),
                reason: "empty rule".to_string(),
            });
        };
        let parts: Vec<&str> = chars.as_str().split(sep).collect();
        if parts.len() != 2 {
            return Err(Error::InvalidRenameRule {
                rule: rule.to_string(),
                reason: format!(
                    "expected exactly two '{}'-separated parts, got {}",
                    sep,
                    parts.len()
                ),
            });
        }
        pairs.insert(parts[0].to_string(), parts[1].to_string());
    }
    Ok(pairs)
}
