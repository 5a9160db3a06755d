//! Job key: deterministic fingerprint of a parameter set.
//!
//! The canonical form is `key=TYPE:value;` for every parameter, keys in byte
//! order. Carrying the type makes `{"x": "1"}` and `{"x": 1}` distinct. The
//! canonical string is digested with MD5 and rendered as 32 lowercase hex
//! characters.
//!
//! The job key is only used to detect duplicate instances. It is never a
//! primary key.

use md5::{Digest, Md5};

use batchstore_core::JobParameters;

/// Canonical `key=TYPE:value;...` rendering, keys sorted.
pub fn canonical_form(parameters: &JobParameters) -> String {
    let mut entries: Vec<_> = parameters.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&value.canonical());
        out.push(';');
    }
    out
}

pub fn fingerprint(parameters: &JobParameters) -> String {
    let digest = Md5::digest(canonical_form(parameters).as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchstore_core::JobParameter;
    use proptest::prelude::*;

    #[test]
    fn empty_parameters_hash_the_empty_string() {
        assert_eq!(
            fingerprint(&JobParameters::new()),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn type_is_part_of_the_key() {
        let text = JobParameters::new().with("x", "1");
        let number = JobParameters::new().with("x", 1_i64);
        assert_ne!(fingerprint(&text), fingerprint(&number));
    }

    #[test]
    fn canonical_form_sorts_by_key() {
        let params = JobParameters::new().with("b", 2_i64).with("a", "x");
        assert_eq!(canonical_form(&params), "a=STRING:x;b=LONG:2;");
    }

    #[test]
    fn fingerprint_is_fixed_width_lowercase_hex() {
        let key = fingerprint(&JobParameters::new().with("run.date", "2024-01-01"));
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn equal_parameter_sets_share_a_key() {
        let positive = JobParameters::new().with("ratio", 0.0);
        let negative = JobParameters::new().with("ratio", -0.0);
        assert_eq!(positive, negative);
        assert_eq!(fingerprint(&positive), fingerprint(&negative));
    }

    fn parameter() -> impl Strategy<Value = JobParameter> {
        prop_oneof![
            "[a-z0-9]{0,8}".prop_map(JobParameter::String),
            any::<i64>().prop_map(JobParameter::Long),
            (-1.0e6..1.0e6f64).prop_map(JobParameter::Double),
        ]
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_insertion_order(
            entries in prop::collection::btree_map("[a-z.]{1,6}", parameter(), 0..8)
        ) {
            let forward: JobParameters = entries.clone().into_iter().collect();
            let backward: JobParameters = entries.into_iter().rev().collect();
            prop_assert_eq!(fingerprint(&forward), fingerprint(&backward));
        }

        #[test]
        fn changing_a_value_changes_the_fingerprint(
            entries in prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 1..6)
        ) {
            let original: JobParameters = entries
                .iter()
                .map(|(k, v)| (k.clone(), JobParameter::Long(*v)))
                .collect();
            let mut changed = original.clone();
            let (first_key, first_value) = entries.iter().next().unwrap();
            changed.insert(first_key.clone(), first_value.wrapping_add(1));
            prop_assert_ne!(fingerprint(&original), fingerprint(&changed));
        }
    }
}
