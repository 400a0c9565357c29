use std::path::Path;
use tracing::info;

/// Load the label table: one label per line, blank lines skipped. A missing
/// or unreadable file is fatal at startup.
pub fn load_labels(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("labels file {}: {e}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        anyhow::bail!("labels file {} is empty", path.display());
    }
    info!(
        path = %path.display(),
        count = labels.len(),
        first = %labels[0],
        "labels loaded"
    );
    Ok(labels)
}

/// Split a raw label on its first underscore into (scientific, common).
/// Labels without a separator use the raw text for both names.
pub fn decode_label(label: &str) -> (&str, &str) {
    match label.split_once('_') {
        Some((scientific, common)) => (scientific, common),
        None => (label, label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_on_first_separator_only() {
        let (scientific, common) = decode_label("Troglodytes troglodytes_Eurasian Wren");
        assert_eq!(scientific, "Troglodytes troglodytes");
        assert_eq!(common, "Eurasian Wren");

        // Extra separators stay in the common name.
        let (scientific, common) = decode_label("Genus species_Common_Name");
        assert_eq!(scientific, "Genus species");
        assert_eq!(common, "Common_Name");
    }

    #[test]
    fn separator_free_label_is_used_for_both_names() {
        let (scientific, common) = decode_label("Unknown call");
        assert_eq!(scientific, "Unknown call");
        assert_eq!(common, "Unknown call");
    }

    #[test]
    fn loads_labels_skipping_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "A_a\n\nB_b\n  \nC_c\n").unwrap();
        let labels = load_labels(&path).unwrap();
        assert_eq!(labels, vec!["A_a", "B_b", "C_c"]);
    }

    #[test]
    fn missing_labels_file_is_fatal() {
        assert!(load_labels(Path::new("/nonexistent/labels.txt")).is_err());
    }
}
