//! Request and manifest templates
//!
//! Templates reference fields of a serializable record as `{{ .Field }}`.
//! Rendering fails if a referenced field does not exist on the record.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Arguments the bundled fixtures are rendered with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateArgs {
    pub namespace: String,
    pub service_account_name: String,
}

impl TemplateArgs {
    pub fn new(namespace: impl Into<String>, service_account_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account_name: service_account_name.into(),
        }
    }

    /// Arguments pointing at a namespace only
    pub fn namespace_only(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "")
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{(?:(-)\s+|\s*)\.([A-Za-z_][A-Za-z0-9_]*)(?:\s+(-)|\s*)\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    fields: Vec<String>,
}

impl Template {
    /// Parse template text
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let source = source.into();

        let fields = placeholder()
            .captures_iter(&source)
            .map(|c| c[2].to_string())
            .collect();

        // Any braces left after removing placeholders are actions we do not support
        let stripped = placeholder().replace_all(&source, "");
        if stripped.contains("{{") {
            return Err(Error::template(&name, "unsupported template action"));
        }

        Ok(Self {
            name,
            source,
            fields,
        })
    }

    /// Read and parse a template file
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(path.display().to_string(), source)
    }

    /// Fields the template references, in order of appearance
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Substitute every placeholder with the matching field of `data`
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        let value = serde_json::to_value(data)?;
        let Value::Object(map) = value else {
            return Err(Error::template(&self.name, "template data must be a record"));
        };

        if let Some(missing) = self.fields.iter().find(|f| !map.contains_key(f.as_str())) {
            return Err(Error::template(
                &self.name,
                format!("can't evaluate field {}", missing),
            ));
        }

        // `{{-` and `-}}` drop the whitespace before and after the action
        let mut rendered = String::with_capacity(self.source.len());
        let mut last = 0;
        let mut trim_next = false;
        for caps in placeholder().captures_iter(&self.source) {
            let (Some(whole), Some(field)) = (caps.get(0), caps.get(2)) else {
                continue;
            };

            let text = &self.source[last..whole.start()];
            rendered.push_str(if trim_next { text.trim_start() } else { text });
            if caps.get(1).is_some() {
                rendered.truncate(rendered.trim_end().len());
            }

            match map.get(field.as_str()) {
                Some(Value::String(s)) => rendered.push_str(s),
                Some(Value::Null) | None => {}
                Some(other) => rendered.push_str(&other.to_string()),
            }

            trim_next = caps.get(3).is_some();
            last = whole.end();
        }

        let tail = &self.source[last..];
        rendered.push_str(if trim_next { tail.trim_start() } else { tail });
        Ok(rendered)
    }
}

/// Render the template at `path` with `data`
pub fn render_template_as_string<T: Serialize>(path: &Path, data: &T) -> Result<String> {
    Template::from_file(path)?.render(data)
}

/// Render a YAML manifest and check every document parses
pub fn render_manifest<T: Serialize>(path: &Path, data: &T) -> Result<String> {
    let rendered = render_template_as_string(path, data)?;

    for document in serde_yaml::Deserializer::from_str(&rendered) {
        serde_yaml::Value::deserialize(document).map_err(|e| {
            Error::template(&path.display().to_string(), format!("invalid YAML: {}", e))
        })?;
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_fields_with_and_without_spaces() {
        let template =
            Template::parse("t", r#"{"ns": "{{ .Namespace }}", "sa": "{{.ServiceAccountName}}"}"#)
                .unwrap();
        let out = template
            .render(&TemplateArgs::new("abc123", "abc123-access-all"))
            .unwrap();
        assert_eq!(out, r#"{"ns": "abc123", "sa": "abc123-access-all"}"#);
        assert_eq!(
            template.fields().to_vec(),
            vec!["Namespace", "ServiceAccountName"]
        );
    }

    #[test]
    fn trim_markers_drop_surrounding_whitespace() {
        let template = Template::parse(
            "t",
            "name:\n  {{- .Namespace }}  \n-{{ .ServiceAccountName -}}\n\t  done",
        )
        .unwrap();
        let rendered = template.render(&TemplateArgs::new("abc", "sa")).unwrap();
        assert_eq!(rendered, "name:abc  \n-sadone");
    }

    #[test]
    fn trim_marker_needs_a_space() {
        assert!(Template::parse("t", "{{-.Namespace}}").is_err());
        assert!(Template::parse("t", "{{ .Namespace-}}").is_err());
    }

    #[test]
    fn empty_field_renders_empty() {
        let template = Template::parse("t", "{{ .Namespace }}/{{ .ServiceAccountName }}").unwrap();
        let out = template
            .render(&TemplateArgs::namespace_only("default"))
            .unwrap();
        assert_eq!(out, "default/");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let template = Template::parse("t", "{{ .Cluster }}").unwrap();
        let err = template.render(&TemplateArgs::default()).unwrap_err();
        assert!(err.to_string().contains("can't evaluate field Cluster"));
    }

    #[test]
    fn unsupported_actions_are_rejected() {
        assert!(Template::parse("t", "{{ range .Items }}x{{ end }}").is_err());
    }

    #[test]
    fn non_record_data_is_rejected() {
        let template = Template::parse("t", "plain").unwrap();
        assert!(template.render(&"just a string").is_err());
    }

    #[test]
    fn manifest_must_be_valid_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.yml.tpl");
        std::fs::write(
            &good,
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: {{ .ServiceAccountName }}-curl\n---\nkind: x\n",
        )
        .unwrap();
        let out = render_manifest(&good, &TemplateArgs::new("ns", "sa")).unwrap();
        assert!(out.contains("name: sa-curl"));

        let bad = tmp.path().join("bad.yml.tpl");
        std::fs::write(&bad, "key: [unclosed\n").unwrap();
        assert!(render_manifest(&bad, &TemplateArgs::default()).is_err());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = render_template_as_string(Path::new("/no/such.tpl"), &TemplateArgs::default())
            .unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
