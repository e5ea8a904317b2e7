//! `{{ .Data.<field> }}` placeholder substitution for BaoSecret templates.
//!
//! Only literal placeholders are replaced; anything else, including
//! placeholders naming absent fields, is left as written.

use std::collections::BTreeMap;

use crate::backend::Data;
use crate::crd::SecretTemplate;
use crate::utils::display_value;

pub fn placeholder(field: &str) -> String {
    format!("{{{{ .Data.{} }}}}", field)
}

/// Substitute every source field into `template`.
pub fn render_value(template: &str, source: &Data) -> String {
    source.iter().fold(template.to_string(), |rendered, (field, value)| {
        rendered.replace(&placeholder(field), &display_value(value))
    })
}

/// Overlay the template outputs onto `data`.
///
/// `stringData` entries are applied first, so a `data` entry with the same
/// key wins.
pub fn apply_template(
    mut data: BTreeMap<String, Vec<u8>>,
    template: &SecretTemplate,
    source: &Data,
) -> BTreeMap<String, Vec<u8>> {
    for (key, value) in template.string_data.iter().chain(template.data.iter()) {
        data.insert(key.clone(), render_value(value, source).into_bytes());
    }
    data
}
