use serde::{Deserialize, Deserializer};

/// Distinguishes an omitted field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH payloads. Use with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims a text field and maps empty input to `None`.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        description: Option<Option<String>>,
    }

    #[test]
    fn omitted_null_and_value_are_distinct() {
        let omitted: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(omitted.description, None);

        let cleared: Patch = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let set: Patch = serde_json::from_str(r#"{"description": "hi"}"#).unwrap();
        assert_eq!(set.description, Some(Some("hi".to_string())));
    }

    #[test]
    fn non_empty_trims_and_drops_blank() {
        assert_eq!(non_empty(Some("  x ".into())), Some("x".into()));
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(None), None);
    }
}
