use sluice_labels::{Labels, LabelsBuilder};

use crate::{Action, RelabelConfig, is_valid_label_name};

/// Applies relabel rules in order.
///
/// Returns `None` if a rule drops the series or if no labels remain. The input is never
/// modified.
pub fn process(labels: &Labels, rules: &[RelabelConfig]) -> Option<Labels> {
    let mut builder = labels.builder();

    for rule in rules {
        if !apply(rule, &mut builder) {
            return None;
        }
    }

    let labels = builder.labels();
    (!labels.is_empty()).then_some(labels)
}

/// Applies a single rule. Returns `false` if the series is dropped.
fn apply(rule: &RelabelConfig, builder: &mut LabelsBuilder) -> bool {
    let value = source_value(rule, builder);

    match rule.action {
        Action::Drop => {
            if rule.regex.is_match(&value) {
                return false;
            }
        }
        Action::Keep => {
            if !rule.regex.is_match(&value) {
                return false;
            }
        }
        Action::DropEqual => {
            if builder.get(&rule.target_label).unwrap_or_default() == value {
                return false;
            }
        }
        Action::KeepEqual => {
            if builder.get(&rule.target_label).unwrap_or_default() != value {
                return false;
            }
        }
        Action::Replace => {
            let Some(captures) = rule.regex.captures(&value) else {
                return true;
            };

            let mut target = String::new();
            captures.expand(&rule.target_label, &mut target);
            if !is_valid_label_name(&target) {
                return true;
            }

            let mut replaced = String::new();
            captures.expand(&rule.replacement, &mut replaced);
            if replaced.is_empty() {
                builder.del(&target);
            } else {
                builder.set(target, replaced);
            }
        }
        Action::Lowercase => {
            builder.set(rule.target_label.as_str(), value.to_lowercase());
        }
        Action::Uppercase => {
            builder.set(rule.target_label.as_str(), value.to_uppercase());
        }
        Action::HashMod => {
            let modulus = hash_mod(&value, rule.modulus);
            builder.set(rule.target_label.as_str(), modulus.to_string());
        }
        Action::LabelMap => {
            let mapped: Vec<(String, String)> = builder
                .iter()
                .filter(|(name, _)| rule.regex.is_match(name))
                .map(|(name, value)| {
                    let name = rule.regex.replace_all(name, rule.replacement.as_str());
                    (name.into_owned(), value.to_owned())
                })
                .collect();

            for (name, value) in mapped {
                builder.set(name, value);
            }
        }
        Action::LabelDrop => {
            builder.retain(|name, _| !rule.regex.is_match(name));
        }
        Action::LabelKeep => {
            builder.retain(|name, _| rule.regex.is_match(name));
        }
    }

    true
}

/// Joins the values of all source labels with the separator. Missing labels count as empty.
fn source_value(rule: &RelabelConfig, builder: &LabelsBuilder) -> String {
    let values: Vec<&str> = rule
        .source_labels
        .iter()
        .map(|name| builder.get(name).unwrap_or_default())
        .collect();
    values.join(&rule.separator)
}

/// Hashes the value with MD5 and reduces the low 8 bytes of the digest.
fn hash_mod(value: &str, modulus: u64) -> u64 {
    let digest = md5::compute(value.as_bytes());
    let mut low = [0; 8];
    low.copy_from_slice(&digest[8..]);
    u64::from_be_bytes(low) % modulus.max(1)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::RelabelRegex;

    fn rule(action: Action) -> RelabelConfig {
        RelabelConfig {
            action,
            ..Default::default()
        }
    }

    fn regex(pattern: &str) -> RelabelRegex {
        RelabelRegex::new(pattern).unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_no_rules() {
        let labels = Labels::from_pairs([("a", "1")]);
        assert_eq!(process(&labels, &[]), Some(labels));
    }

    #[test]
    fn test_replace_with_capture() {
        let labels = Labels::from_pairs([("a", "foo"), ("b", "bar")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("f(.*)"),
            target_label: "d".to_owned(),
            replacement: "ch${1}-ch${1}".to_owned(),
            ..rule(Action::Replace)
        }];

        assert_eq!(
            process(&labels, &rules),
            Some(Labels::from_pairs([
                ("a", "foo"),
                ("b", "bar"),
                ("d", "choo-choo")
            ]))
        );
    }

    #[test]
    fn test_replace_joins_sources() {
        let labels = Labels::from_pairs([("a", "foo"), ("b", "bar")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a", "b"]),
            regex: regex("(.*);(.*)"),
            target_label: "c".to_owned(),
            replacement: "$2.$1".to_owned(),
            ..rule(Action::Replace)
        }];

        let result = process(&labels, &rules).unwrap();
        assert_eq!(result.get("c"), Some("bar.foo"));
    }

    #[test]
    fn test_replace_no_match_keeps_labels() {
        let labels = Labels::from_pairs([("a", "foo")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("x(.*)"),
            target_label: "b".to_owned(),
            ..rule(Action::Replace)
        }];

        assert_eq!(process(&labels, &rules), Some(labels));
    }

    #[test]
    fn test_replace_empty_deletes_target() {
        let labels = Labels::from_pairs([("a", "foo"), ("b", "bar")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["missing"]),
            target_label: "b".to_owned(),
            ..rule(Action::Replace)
        }];

        assert_eq!(
            process(&labels, &rules),
            Some(Labels::from_pairs([("a", "foo")]))
        );
    }

    #[test]
    fn test_replace_templated_target() {
        let labels = Labels::from_pairs([("a", "some-name-value")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("some-([^-]+)-([^,]+)"),
            target_label: "${1}".to_owned(),
            replacement: "${2}".to_owned(),
            ..rule(Action::Replace)
        }];

        let result = process(&labels, &rules).unwrap();
        assert_eq!(result.get("name"), Some("value"));
    }

    #[test]
    fn test_replace_invalid_target_is_skipped() {
        let labels = Labels::from_pairs([("a", "some-0-value")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("some-([^-]+)-([^,]+)"),
            target_label: "${1}".to_owned(),
            replacement: "${2}".to_owned(),
            ..rule(Action::Replace)
        }];

        assert_eq!(process(&labels, &rules), Some(labels));
    }

    #[test]
    fn test_keep_and_drop() {
        let labels = Labels::from_pairs([("a", "foo")]);
        let keep = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("f.*"),
            ..rule(Action::Keep)
        }];
        let drop = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("f.*"),
            ..rule(Action::Drop)
        }];
        let keep_other = [RelabelConfig {
            source_labels: strings(&["a"]),
            regex: regex("b.*"),
            ..rule(Action::Keep)
        }];

        assert_eq!(process(&labels, &keep), Some(labels.clone()));
        assert_eq!(process(&labels, &drop), None);
        assert_eq!(process(&labels, &keep_other), None);
    }

    #[test]
    fn test_keep_missing_label() {
        let labels = Labels::from_pairs([("a", "foo")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["missing"]),
            regex: regex(""),
            ..rule(Action::Keep)
        }];

        assert_eq!(process(&labels, &rules), Some(labels));
    }

    #[test]
    fn test_keepequal_dropequal() {
        let equal = Labels::from_pairs([("a", "1"), ("b", "1")]);
        let different = Labels::from_pairs([("a", "1"), ("b", "2")]);

        let keepequal = [RelabelConfig {
            source_labels: strings(&["a"]),
            target_label: "b".to_owned(),
            ..rule(Action::KeepEqual)
        }];
        let dropequal = [RelabelConfig {
            source_labels: strings(&["a"]),
            target_label: "b".to_owned(),
            ..rule(Action::DropEqual)
        }];

        assert_eq!(process(&equal, &keepequal), Some(equal.clone()));
        assert_eq!(process(&different, &keepequal), None);
        assert_eq!(process(&equal, &dropequal), None);
        assert_eq!(process(&different, &dropequal), Some(different.clone()));
    }

    #[test]
    fn test_hashmod() {
        let labels = Labels::from_pairs([("a", "foo")]);
        let rules = [RelabelConfig {
            source_labels: strings(&["a"]),
            target_label: "shard".to_owned(),
            modulus: 1000,
            ..rule(Action::HashMod)
        }];

        let result = process(&labels, &rules).unwrap();
        let shard: u64 = result.get("shard").unwrap().parse().unwrap();
        assert!(shard < 1000);
        assert_eq!(shard, hash_mod("foo", 1000));

        // deterministic
        assert_eq!(process(&labels, &rules), Some(result));
    }

    #[test]
    fn test_hash_mod_uses_low_bytes() {
        // md5("foo") = acbd18db4cc2f85cedef654fccc4a4d8
        let expected = u64::from_be_bytes([0xed, 0xef, 0x65, 0x4f, 0xcc, 0xc4, 0xa4, 0xd8]);
        assert_eq!(hash_mod("foo", u64::MAX), expected % u64::MAX);
    }

    #[test]
    fn test_labelmap() {
        let labels = Labels::from_pairs([("a", "foo"), ("meta_env", "prod"), ("meta_zone", "b")]);
        let rules = [RelabelConfig {
            regex: regex("meta_(.+)"),
            ..rule(Action::LabelMap)
        }];

        assert_eq!(
            process(&labels, &rules),
            Some(Labels::from_pairs([
                ("a", "foo"),
                ("env", "prod"),
                ("meta_env", "prod"),
                ("meta_zone", "b"),
                ("zone", "b"),
            ]))
        );
    }

    #[test]
    fn test_labeldrop_labelkeep() {
        let labels = Labels::from_pairs([("a", "1"), ("b1", "2"), ("b2", "3")]);
        let labeldrop = [RelabelConfig {
            regex: regex("b.*"),
            ..rule(Action::LabelDrop)
        }];
        let labelkeep = [RelabelConfig {
            regex: regex("b.*"),
            ..rule(Action::LabelKeep)
        }];

        assert_eq!(
            process(&labels, &labeldrop),
            Some(Labels::from_pairs([("a", "1")]))
        );
        assert_eq!(
            process(&labels, &labelkeep),
            Some(Labels::from_pairs([("b1", "2"), ("b2", "3")]))
        );
    }

    #[test]
    fn test_drop_all_labels_drops_series() {
        let labels = Labels::from_pairs([("a", "1")]);
        let rules = [RelabelConfig {
            regex: regex(".*"),
            ..rule(Action::LabelDrop)
        }];

        assert_eq!(process(&labels, &rules), None);
    }

    #[test]
    fn test_lowercase_uppercase() {
        let labels = Labels::from_pairs([("a", "FoO")]);
        let rules = [
            RelabelConfig {
                source_labels: strings(&["a"]),
                target_label: "lower".to_owned(),
                ..rule(Action::Lowercase)
            },
            RelabelConfig {
                source_labels: strings(&["a"]),
                target_label: "upper".to_owned(),
                ..rule(Action::Uppercase)
            },
        ];

        let result = process(&labels, &rules).unwrap();
        assert_eq!(result.get("lower"), Some("foo"));
        assert_eq!(result.get("upper"), Some("FOO"));
    }

    #[test]
    fn test_rules_apply_in_order() {
        let labels = Labels::from_pairs([("a", "foo")]);
        let rules = [
            RelabelConfig {
                source_labels: strings(&["a"]),
                target_label: "b".to_owned(),
                ..rule(Action::Replace)
            },
            RelabelConfig {
                source_labels: strings(&["b"]),
                regex: regex("foo"),
                ..rule(Action::Drop)
            },
        ];

        assert_eq!(process(&labels, &rules), None);
    }
}
