//! HTTP handlers

pub mod health;
pub mod rag;
pub mod search;

use avoda_common::db::RequestView;

/// `target_fields` carries the same display-label vocabulary as
/// `QueryConfig::target_fields_by_intent`/`field_label_map` ("Project",
/// "Updated By", "Created By", "Type", "Status"), while `RequestView.fields`
/// keys are the request model's own snake_case column names. This table
/// bridges the two so `project_fields` filters by the column the label
/// actually names.
const LABEL_FIELD_KEYS: &[(&str, &str)] = &[
    ("Project", "project_name"),
    ("Updated By", "updated_by"),
    ("Created By", "created_by"),
    ("Type", "type_id"),
    ("Status", "status_id"),
];

fn field_key_for_label(label: &str) -> Option<&'static str> {
    LABEL_FIELD_KEYS
        .iter()
        .find(|(candidate, _)| *candidate == label)
        .map(|(_, key)| *key)
}

/// Applies `include_details`: when `false`, trims each view's field map
/// down to the fields the query actually targeted, keeping responses
/// small by default without dropping the identifier or scoring fields.
pub(crate) fn project_fields(
    mut requests: Vec<RequestView>,
    target_fields: &[String],
    include_details: bool,
) -> Vec<RequestView> {
    if include_details || target_fields.is_empty() {
        return requests;
    }
    let allowed_keys: Vec<&str> = target_fields.iter().filter_map(|label| field_key_for_label(label)).collect();
    if allowed_keys.is_empty() {
        return requests;
    }
    for view in &mut requests {
        view.fields.retain(|key, _| allowed_keys.contains(&key.as_str()));
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn view(fields: &[(&str, &str)]) -> RequestView {
        RequestView {
            request_id: "1".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect::<HashMap<_, _>>(),
            similarity: 1.0,
            boost: 1.0,
        }
    }

    #[test]
    fn test_project_fields_keeps_only_labeled_columns() {
        let requests = vec![view(&[
            ("project_name", "Roads"),
            ("type_id", "4"),
            ("status_id", "2"),
            ("description", "long text"),
        ])];
        let projected = project_fields(requests, &["Project".to_string()], false);
        assert_eq!(projected[0].fields.len(), 1);
        assert!(projected[0].fields.contains_key("project_name"));
    }

    #[test]
    fn test_project_fields_passes_through_when_include_details() {
        let requests = vec![view(&[("project_name", "Roads")])];
        let projected = project_fields(requests, &["Project".to_string()], true);
        assert_eq!(projected[0].fields.len(), 1);
    }

    #[test]
    fn test_project_fields_passes_through_when_no_target_fields() {
        let requests = vec![view(&[("project_name", "Roads")])];
        let projected = project_fields(requests, &[], false);
        assert_eq!(projected[0].fields.len(), 1);
    }
}
