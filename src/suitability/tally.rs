//! Counting intersection of per-file candidate keys.

use std::collections::{HashMap, HashSet};

use crate::domain::model::SuitableMethods;
use crate::domain::ports::MethodSuitability;

/// One atomic suitability claim: a method, optionally with one parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    pub method: String,
    pub parameters: Option<String>,
}

/// Counts, for every candidate key, how many files reported it.
///
/// A key reported by every file is globally suitable. Keys remember the order
/// they were first seen in so the collapsed result is stable for a given
/// input order.
#[derive(Debug, Default)]
pub struct SuitabilityTally {
    counts: HashMap<CandidateKey, usize>,
    order: Vec<CandidateKey>,
    files: usize,
}

impl SuitabilityTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Add the engine's answer for one file.
    pub fn add_file(&mut self, suitable: &[MethodSuitability]) {
        self.files += 1;

        let mut seen = HashSet::new();
        for key in flatten(suitable) {
            if !seen.insert(key.clone()) {
                continue;
            }
            let count = self.counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                self.order.push(key);
            }
            *count += 1;
        }
    }

    /// Keys reported by every file, in first-seen order.
    pub fn globally_suitable(&self) -> Vec<&CandidateKey> {
        if self.files == 0 {
            return Vec::new();
        }
        self.order
            .iter()
            .filter(|key| self.counts.get(*key) == Some(&self.files))
            .collect()
    }

    /// Collapse the globally suitable keys into methods and parameter lists.
    pub fn finish(&self) -> SuitableMethods {
        let mut result = SuitableMethods::default();
        for key in self.globally_suitable() {
            if !result.methods.contains(&key.method) {
                result.methods.push(key.method.clone());
            }
            if let Some(parameters) = &key.parameters {
                result
                    .parameters
                    .entry(key.method.clone())
                    .or_default()
                    .push(parameters.clone());
            }
        }
        result
    }
}

fn flatten(suitable: &[MethodSuitability]) -> impl Iterator<Item = CandidateKey> + '_ {
    suitable.iter().flat_map(|entry| {
        let keys: Vec<CandidateKey> = if entry.parameters.is_empty() {
            vec![CandidateKey {
                method: entry.method.clone(),
                parameters: None,
            }]
        } else {
            entry
                .parameters
                .iter()
                .map(|p| CandidateKey {
                    method: entry.method.clone(),
                    parameters: Some(p.clone()),
                })
                .collect()
        };
        keys
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn eem() -> MethodSuitability {
        MethodSuitability::parameterless("eem")
    }

    #[test]
    fn test_method_missing_from_one_file_is_dropped() {
        let mut tally = SuitabilityTally::new();
        tally.add_file(&[eem(), MethodSuitability::parameterless("sqe")]);
        tally.add_file(&[eem(), MethodSuitability::parameterless("sqe")]);
        tally.add_file(&[eem()]);

        let result = tally.finish();
        assert_eq!(result.methods, vec!["eem".to_string()]);
        assert!(result.parameters.is_empty());
    }

    #[test]
    fn test_parameters_intersect_per_set() {
        let mut tally = SuitabilityTally::new();
        tally.add_file(&[MethodSuitability::with_parameters("qeq", ["p1", "p2"])]);
        tally.add_file(&[MethodSuitability::with_parameters("qeq", ["p2", "p3"])]);

        let result = tally.finish();
        assert_eq!(result.methods, vec!["qeq".to_string()]);
        assert_eq!(result.parameters["qeq"], vec!["p2".to_string()]);
    }

    #[test]
    fn test_duplicates_within_a_file_count_once() {
        let mut tally = SuitabilityTally::new();
        tally.add_file(&[eem(), eem()]);
        tally.add_file(&[]);

        assert!(tally.finish().methods.is_empty());
    }

    #[test]
    fn test_no_files_gives_nothing() {
        let tally = SuitabilityTally::new();
        assert_eq!(tally.file_count(), 0);
        assert_eq!(tally.finish(), SuitableMethods::default());
    }

    fn file_strategy() -> impl Strategy<Value = Vec<MethodSuitability>> {
        let method = prop::sample::select(vec!["eem", "qeq", "sqe", "mgc"]);
        let params = prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..3);
        prop::collection::vec(
            (method, params).prop_map(|(m, p)| MethodSuitability::with_parameters(m, p)),
            0..5,
        )
    }

    fn key_set(file: &[MethodSuitability]) -> BTreeSet<(String, Option<String>)> {
        flatten(file).map(|k| (k.method, k.parameters)).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_tally_equals_set_intersection(files in prop::collection::vec(file_strategy(), 1..6)) {
            let mut tally = SuitabilityTally::new();
            for file in &files {
                tally.add_file(file);
            }

            let expected = files
                .iter()
                .map(|f| key_set(f))
                .reduce(|acc, next| acc.intersection(&next).cloned().collect())
                .unwrap_or_default();
            let actual: BTreeSet<(String, Option<String>)> = tally
                .globally_suitable()
                .into_iter()
                .map(|k| (k.method.clone(), k.parameters.clone()))
                .collect();

            prop_assert_eq!(actual, expected);

            let result = tally.finish();
            let unique: BTreeSet<&String> = result.methods.iter().collect();
            prop_assert_eq!(unique.len(), result.methods.len());
        }
    }
}
