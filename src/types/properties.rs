use std::fmt;

/// Prefix under which cloud resource tags are stored in a properties bag.
const TAG_PREFIX: &str = "tag:";

/// Ordered key→value string map describing a discovered resource.
///
/// Used by the filter stages for rule matching and by the CLI for display.
/// A properties bag is a pure projection of already-loaded resource fields;
/// building one never performs I/O and never mutates the resource.
///
/// Cloud resource tags live in a reserved namespace: `set_tag("Name", v)`
/// stores the entry under `tag:Name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, overwriting in place if the key already exists.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
        self
    }

    /// Set a property only if the value is present.
    pub fn set_opt(&mut self, key: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    /// Set a cloud resource tag under the `tag:` namespace.
    pub fn set_tag(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.set(&format!("{TAG_PREFIX}{key}"), value)
    }

    /// Set a cloud resource tag from optional key/value, skipping entries
    /// with a missing or empty key.
    pub fn set_tag_opt(&mut self, key: Option<&str>, value: Option<&str>) -> &mut Self {
        if let Some(key) = key {
            if !key.is_empty() {
                return self.set_tag(key, value.unwrap_or_default());
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the tag entries as `key1=value1&key2=value2`, keys sorted
    /// alphabetically. This is the canonical form the tag regex filters
    /// match against.
    pub fn tag_string(&self) -> String {
        let mut tags: Vec<(&str, &str)> = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(TAG_PREFIX)
                    .map(|stripped| (stripped, v.as_str()))
            })
            .collect();
        tags.sort();
        tags.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries
            .iter()
            .map(|(k, v)| format!("{k}: \"{v}\""))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{rendered}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut properties = Properties::new();
        properties.set("Name", "example").set("Region", "us-east-1");

        assert_eq!(properties.get("Name"), Some("example"));
        assert_eq!(properties.get("Region"), Some("us-east-1"));
        assert_eq!(properties.get("Missing"), None);
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut properties = Properties::new();
        properties.set("Status", "creating");
        properties.set("Other", "x");
        properties.set("Status", "active");

        assert_eq!(properties.get("Status"), Some("active"));
        // Insertion order preserved; no duplicate entry appended.
        let keys: Vec<&str> = properties.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Status", "Other"]);
    }

    #[test]
    fn set_opt_skips_none() {
        let mut properties = Properties::new();
        properties.set_opt("ARN", Some("arn:aws:ec2:::x"));
        properties.set_opt("VpcId", None::<String>);

        assert_eq!(properties.get("ARN"), Some("arn:aws:ec2:::x"));
        assert_eq!(properties.get("VpcId"), None);
    }

    #[test]
    fn tags_live_under_tag_namespace() {
        let mut properties = Properties::new();
        properties.set("Name", "example");
        properties.set_tag("Environment", "prod");
        properties.set_tag_opt(Some("Team"), Some("storage"));
        properties.set_tag_opt(None, Some("ignored"));
        properties.set_tag_opt(Some(""), Some("ignored"));

        assert_eq!(properties.get("tag:Environment"), Some("prod"));
        assert_eq!(properties.get("tag:Team"), Some("storage"));
        assert_eq!(properties.get("Environment"), None);
    }

    #[test]
    fn tag_string_is_sorted_and_ampersand_separated() {
        let mut properties = Properties::new();
        properties.set("Name", "example");
        properties.set_tag("b", "2");
        properties.set_tag("a", "1");

        assert_eq!(properties.tag_string(), "a=1&b=2");
    }

    #[test]
    fn tag_string_empty_without_tags() {
        let mut properties = Properties::new();
        properties.set("Name", "example");
        assert_eq!(properties.tag_string(), "");
    }

    #[test]
    fn display_renders_entries_in_order() {
        let mut properties = Properties::new();
        properties.set("Name", "example").set_tag("env", "dev");
        assert_eq!(
            properties.to_string(),
            "[Name: \"example\", tag:env: \"dev\"]"
        );
    }
}
