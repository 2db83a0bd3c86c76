//! Structural validation of fetched manifest documents.
//!
//! Validation is a pure function over the raw parsed JSON. Issues carry a
//! dot-notation path into the document and a severity; a document is valid
//! iff it has zero error-severity issues, and a document with only warnings
//! still syncs. Entries are validated in isolation: one malformed entry does
//! not abort validation of the rest. The single exception is an unsupported
//! `version`, which rejects the document entirely with no partial validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::manifest::{ManifestServiceEntry, SUPPORTED_VERSIONS};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The document (or one entry) is structurally unusable.
    Error,
    /// Something looks off but does not block syncing.
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dot-notation pointer into the document, e.g. `services[2].health_endpoint`.
    pub path: String,

    /// Whether this blocks syncing.
    pub severity: Severity,

    /// Human-readable description.
    pub message: String,
}

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestValidationResult {
    /// True iff zero error-severity issues were found.
    pub valid: bool,

    /// The declared schema version, when it parsed as an integer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Number of entries in the `services` array.
    pub service_count: usize,

    /// Number of entries that passed per-entry validation.
    pub valid_count: usize,

    /// All findings, in document order.
    pub issues: Vec<ValidationIssue>,
}

impl ManifestValidationResult {
    /// Error-severity messages, with paths, for carrying into a run result.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect()
    }

    /// Warning-severity messages, with paths.
    #[must_use]
    pub fn warning_messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect()
    }
}

/// A validated document: the report plus the entries that passed.
#[derive(Debug, Clone)]
pub struct ValidatedManifest {
    /// The validation report.
    pub report: ManifestValidationResult,

    /// Parsed entries that passed per-entry validation, in document order.
    pub entries: Vec<ManifestServiceEntry>,
}

/// Document-level fields the schema knows.
const DOCUMENT_FIELDS: &[&str] = &["version", "services"];

/// Entry-level fields the schema knows.
const ENTRY_FIELDS: &[&str] = &[
    "manifest_key",
    "name",
    "health_endpoint",
    "metrics_endpoint",
    "description",
    "dependencies",
    "associations",
];

/// Dependency-level fields the schema knows.
const DEPENDENCY_FIELDS: &[&str] = &["name", "alias", "contact_override", "impact_override"];

/// Association-level fields the schema knows.
const ASSOCIATION_FIELDS: &[&str] = &["dependency_name", "linked_service_key", "association_type"];

/// Validates a raw manifest document.
#[must_use]
pub fn validate_manifest(document: &Value) -> ValidatedManifest {
    let mut issues = Vec::new();
    let mut entries = Vec::new();

    let Some(object) = document.as_object() else {
        issues.push(error("", "document must be a JSON object"));
        return finish(None, 0, 0, issues, entries);
    };

    for key in object.keys() {
        if !DOCUMENT_FIELDS.contains(&key.as_str()) {
            issues.push(warning(key, "unknown field"));
        }
    }

    let version = match object.get("version").and_then(Value::as_u64) {
        Some(v) => u32::try_from(v).ok(),
        None => None,
    };
    let service_count = object
        .get("services")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    let Some(version) = version else {
        issues.push(error("version", "missing or non-integer manifest version"));
        return finish(None, service_count, 0, issues, entries);
    };
    if !SUPPORTED_VERSIONS.contains(&version) {
        issues.push(error(
            "version",
            format!("unsupported manifest version {version}; supported: {SUPPORTED_VERSIONS:?}"),
        ));
        // No partial validation of entries under an unknown schema.
        return finish(Some(version), service_count, 0, issues, entries);
    }

    let Some(services) = object.get("services").and_then(Value::as_array) else {
        issues.push(error("services", "missing or non-array services list"));
        return finish(Some(version), 0, 0, issues, entries);
    };

    let mut seen_keys: HashSet<String> = HashSet::new();
    for (index, entry) in services.iter().enumerate() {
        let path = format!("services[{index}]");
        if let Some(parsed) = validate_entry(entry, &path, &mut seen_keys, &mut issues) {
            entries.push(parsed);
        }
    }

    let valid_count = entries.len();
    finish(Some(version), service_count, valid_count, issues, entries)
}

fn validate_entry(
    entry: &Value,
    path: &str,
    seen_keys: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<ManifestServiceEntry> {
    let Some(object) = entry.as_object() else {
        issues.push(error(path, "service entry must be a JSON object"));
        return None;
    };

    for key in object.keys() {
        if !ENTRY_FIELDS.contains(&key.as_str()) {
            issues.push(warning(format!("{path}.{key}"), "unknown field"));
        }
    }

    let mut usable = true;

    let manifest_key = non_empty_string(object.get("manifest_key"));
    if manifest_key.is_none() {
        issues.push(error(
            format!("{path}.manifest_key"),
            "missing or empty manifest_key",
        ));
        usable = false;
    }
    if non_empty_string(object.get("name")).is_none() {
        issues.push(error(format!("{path}.name"), "missing or empty name"));
        usable = false;
    }
    match non_empty_string(object.get("health_endpoint")) {
        Some(endpoint) => {
            if reqwest::Url::parse(&endpoint).is_err() {
                issues.push(error(
                    format!("{path}.health_endpoint"),
                    format!("'{endpoint}' is not a valid URL"),
                ));
                usable = false;
            }
        }
        None => {
            issues.push(error(
                format!("{path}.health_endpoint"),
                "missing or empty health_endpoint",
            ));
            usable = false;
        }
    }

    // Duplicate manifest_key is an error on the second and later occurrences.
    if let Some(key) = &manifest_key {
        if !seen_keys.insert(key.clone()) {
            issues.push(error(
                format!("{path}.manifest_key"),
                format!("duplicate manifest_key '{key}'"),
            ));
            usable = false;
        }
    }

    if let Some(dependencies) = object.get("dependencies") {
        match dependencies.as_array() {
            Some(deps) => {
                for (i, dep) in deps.iter().enumerate() {
                    usable &=
                        validate_dependency(dep, &format!("{path}.dependencies[{i}]"), issues);
                }
            }
            None => {
                issues.push(error(
                    format!("{path}.dependencies"),
                    "dependencies must be an array",
                ));
                usable = false;
            }
        }
    }

    if let Some(associations) = object.get("associations") {
        if !associations.is_null() {
            match associations.as_array() {
                Some(assocs) => {
                    for (i, assoc) in assocs.iter().enumerate() {
                        usable &= validate_association(
                            assoc,
                            &format!("{path}.associations[{i}]"),
                            issues,
                        );
                    }
                }
                None => {
                    issues.push(error(
                        format!("{path}.associations"),
                        "associations must be an array",
                    ));
                    usable = false;
                }
            }
        }
    }

    if !usable {
        return None;
    }

    match serde_json::from_value::<ManifestServiceEntry>(entry.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            issues.push(error(path, format!("entry does not match schema: {e}")));
            None
        }
    }
}

fn validate_dependency(dep: &Value, path: &str, issues: &mut Vec<ValidationIssue>) -> bool {
    let Some(object) = dep.as_object() else {
        issues.push(error(path, "dependency must be a JSON object"));
        return false;
    };
    for key in object.keys() {
        if !DEPENDENCY_FIELDS.contains(&key.as_str()) {
            issues.push(warning(format!("{path}.{key}"), "unknown field"));
        }
    }
    if non_empty_string(object.get("name")).is_none() {
        issues.push(error(
            format!("{path}.name"),
            "missing or empty dependency name",
        ));
        return false;
    }
    true
}

fn validate_association(assoc: &Value, path: &str, issues: &mut Vec<ValidationIssue>) -> bool {
    let Some(object) = assoc.as_object() else {
        issues.push(error(path, "association must be a JSON object"));
        return false;
    };
    for key in object.keys() {
        if !ASSOCIATION_FIELDS.contains(&key.as_str()) {
            issues.push(warning(format!("{path}.{key}"), "unknown field"));
        }
    }
    let mut usable = true;
    for required in ["dependency_name", "linked_service_key", "association_type"] {
        if non_empty_string(object.get(required)).is_none() {
            issues.push(error(
                format!("{path}.{required}"),
                format!("missing or empty {required}"),
            ));
            usable = false;
        }
    }
    usable
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finish(
    version: Option<u32>,
    service_count: usize,
    valid_count: usize,
    issues: Vec<ValidationIssue>,
    entries: Vec<ManifestServiceEntry>,
) -> ValidatedManifest {
    let valid = issues.iter().all(|i| i.severity != Severity::Error);
    ValidatedManifest {
        report: ManifestValidationResult {
            valid,
            version,
            service_count,
            valid_count,
            issues,
        },
        entries,
    }
}

fn error(path: impl Into<String>, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        path: path.into(),
        severity: Severity::Error,
        message: message.into(),
    }
}

fn warning(path: impl Into<String>, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        path: path.into(),
        severity: Severity::Warning,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str) -> Value {
        json!({
            "manifest_key": key,
            "name": key.to_uppercase(),
            "health_endpoint": format!("https://{key}.internal/health"),
        })
    }

    #[test]
    fn valid_document_with_two_services() {
        let doc = json!({ "version": 1, "services": [entry("svc-a"), entry("svc-b")] });
        let validated = validate_manifest(&doc);

        assert!(validated.report.valid);
        assert_eq!(validated.report.version, Some(1));
        assert_eq!(validated.report.service_count, 2);
        assert_eq!(validated.report.valid_count, 2);
        assert!(validated.report.issues.is_empty());
        assert_eq!(validated.entries.len(), 2);
    }

    #[test]
    fn unsupported_version_rejects_entire_document() {
        let doc = json!({ "version": 99, "services": [entry("svc-a")] });
        let validated = validate_manifest(&doc);

        assert!(!validated.report.valid);
        // No partial validation: the well-formed entry is not counted.
        assert_eq!(validated.report.valid_count, 0);
        assert!(validated.entries.is_empty());
        assert_eq!(validated.report.issues[0].path, "version");
    }

    #[test]
    fn bad_entry_does_not_abort_the_rest() {
        let doc = json!({
            "version": 1,
            "services": [
                { "manifest_key": "svc-a", "name": "A" },
                entry("svc-b"),
            ]
        });
        let validated = validate_manifest(&doc);

        assert!(!validated.report.valid);
        assert_eq!(validated.report.service_count, 2);
        assert_eq!(validated.report.valid_count, 1);
        assert_eq!(validated.entries[0].manifest_key, "svc-b");
        assert!(validated
            .report
            .issues
            .iter()
            .any(|i| i.path == "services[0].health_endpoint"));
    }

    #[test]
    fn duplicate_manifest_key_errors_on_second_occurrence() {
        let doc = json!({ "version": 1, "services": [entry("svc-a"), entry("svc-a")] });
        let validated = validate_manifest(&doc);

        assert!(!validated.report.valid);
        assert_eq!(validated.report.valid_count, 1);
        let dup = validated
            .report
            .issues
            .iter()
            .find(|i| i.message.contains("duplicate"))
            .expect("duplicate issue");
        assert_eq!(dup.path, "services[1].manifest_key");
    }

    #[test]
    fn unknown_fields_warn_but_still_sync() {
        let mut svc = entry("svc-a");
        svc["favourite_colour"] = json!("mauve");
        let doc = json!({ "version": 1, "services": [svc], "extra": true });
        let validated = validate_manifest(&doc);

        assert!(validated.report.valid);
        assert_eq!(validated.report.valid_count, 1);
        let warnings = validated.report.warning_messages();
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .any(|w| w.contains("services[0].favourite_colour")));
    }

    #[test]
    fn invalid_health_endpoint_url_is_an_error() {
        let doc = json!({
            "version": 1,
            "services": [{
                "manifest_key": "svc-a",
                "name": "A",
                "health_endpoint": "not a url",
            }]
        });
        let validated = validate_manifest(&doc);

        assert!(!validated.report.valid);
        assert!(validated
            .report
            .error_messages()
            .iter()
            .any(|m| m.contains("not a valid URL")));
    }

    #[test]
    fn dependency_without_name_is_an_error() {
        let mut svc = entry("svc-a");
        svc["dependencies"] = json!([{ "alias": "db" }]);
        let doc = json!({ "version": 1, "services": [svc] });
        let validated = validate_manifest(&doc);

        assert!(!validated.report.valid);
        assert_eq!(validated.report.valid_count, 0);
    }

    #[test]
    fn non_object_document_is_an_error() {
        let validated = validate_manifest(&json!([1, 2, 3]));
        assert!(!validated.report.valid);
        assert_eq!(validated.report.service_count, 0);
    }
}
