//! Architectural layer classification.
//!
//! An ordered list of (predicate, label) rules evaluated top to bottom:
//! directory-name rules first, filename-suffix rules as a fallback. The
//! first matching rule wins; no match leaves the layer `unknown`.

use crate::models::Layer;

enum Rule {
    /// Any path component equals the directory name.
    DirName(&'static str),
    /// The file stem ends with the suffix (e.g. `*_handler.*`).
    FileSuffix(&'static str),
}

const LAYER_RULES: &[(Rule, Layer)] = &[
    (Rule::DirName("api"), Layer::Api),
    (Rule::DirName("cli"), Layer::Api),
    (Rule::DirName("server"), Layer::Api),
    (Rule::DirName("routes"), Layer::Api),
    (Rule::DirName("agents"), Layer::Core),
    (Rule::DirName("tools"), Layer::Core),
    (Rule::DirName("core"), Layer::Core),
    (Rule::DirName("services"), Layer::Core),
    (Rule::DirName("models"), Layer::Data),
    (Rule::DirName("db"), Layer::Data),
    (Rule::DirName("storage"), Layer::Data),
    (Rule::DirName("memory"), Layer::Data),
    (Rule::FileSuffix("_handler"), Layer::Api),
    (Rule::FileSuffix("_endpoint"), Layer::Api),
];

/// Classify a repository-relative path into an architectural layer.
pub fn classify_layer(path: &str) -> Layer {
    let normalized = path.replace('\\', "/");
    let components: Vec<&str> = normalized.split('/').collect();
    let (dirs, file_name) = match components.split_last() {
        Some((file, dirs)) => (dirs, *file),
        None => return Layer::Unknown,
    };
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);

    for (rule, layer) in LAYER_RULES {
        let matched = match rule {
            Rule::DirName(name) => dirs.iter().any(|d| d == name),
            Rule::FileSuffix(suffix) => stem.ends_with(suffix),
        };
        if matched {
            return *layer;
        }
    }
    Layer::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_directory_wins_over_handler_suffix() {
        assert_eq!(classify_layer("src/api/routes/login_handler.py"), Layer::Api);
    }

    #[test]
    fn models_directory_is_data() {
        assert_eq!(classify_layer("src/models/user.py"), Layer::Data);
    }

    #[test]
    fn unmatched_path_is_unknown() {
        assert_eq!(classify_layer("src/weird/thing.py"), Layer::Unknown);
    }

    #[test]
    fn suffix_rule_applies_outside_known_directories() {
        assert_eq!(classify_layer("src/misc/payment_handler.go"), Layer::Api);
        assert_eq!(classify_layer("src/misc/payment_endpoint.ts"), Layer::Api);
    }

    #[test]
    fn rule_order_prefers_directory_match() {
        // The agents/ rule fires before the _handler suffix fallback.
        assert_eq!(classify_layer("src/agents/event_handler.py"), Layer::Core);
    }
}
