//! Scripted engine for tests and dry runs
//!
//! Reads SDF-style files (records separated by `$$$$`, atom count from the
//! counts line) and produces deterministic charges. Suitability and failures
//! are driven by the file text, and every call is counted so tests can
//! assert how often the engine ran.

use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::model::{CalculationConfig, Charges, ReadOptions};
use crate::domain::ports::{ChargeEngine, MethodSuitability, MoleculeSet};
use crate::error::EngineError;

type SuitabilityRule = dyn Fn(&str) -> Vec<MethodSuitability> + Send + Sync;

/// Parsed molecules plus the raw text the suitability rule looks at.
#[derive(Debug, Clone)]
pub struct ScriptedMolecules {
    pub molecules: Vec<(String, usize)>,
    pub text: String,
}

impl MoleculeSet for ScriptedMolecules {
    fn molecule_count(&self) -> usize {
        self.molecules.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ScriptedEngine {
    rule: Arc<SuitabilityRule>,
    fail_marker: Option<String>,
    panic_marker: Option<String>,
    delay: Duration,
    loads: AtomicUsize,
    suitability_checks: AtomicUsize,
    calculations: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Every file is suitable for `eem` and for `qeq` with parameter set `default`.
    pub fn new() -> Self {
        Self {
            rule: Arc::new(|_: &str| {
                vec![
                    MethodSuitability::parameterless("eem"),
                    MethodSuitability::with_parameters("qeq", ["default"]),
                ]
            }),
            fail_marker: None,
            panic_marker: None,
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            suitability_checks: AtomicUsize::new(0),
            calculations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_suitability<F>(mut self, rule: F) -> Self
    where
        F: Fn(&str) -> Vec<MethodSuitability> + Send + Sync + 'static,
    {
        self.rule = Arc::new(rule);
        self
    }

    /// Loading fails for files containing `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Calculation panics for files containing `marker`.
    pub fn panicking_on(mut self, marker: impl Into<String>) -> Self {
        self.panic_marker = Some(marker.into());
        self
    }

    /// Time each calculation takes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn suitability_calls(&self) -> usize {
        self.suitability_checks.load(Ordering::SeqCst)
    }

    pub fn calculation_calls(&self) -> usize {
        self.calculations.load(Ordering::SeqCst)
    }

    /// Most calculations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn scripted<'a>(&self, molecules: &'a dyn MoleculeSet) -> Result<&'a ScriptedMolecules, EngineError> {
        molecules
            .as_any()
            .downcast_ref::<ScriptedMolecules>()
            .ok_or_else(|| EngineError::new("molecule set was not loaded by this engine"))
    }
}

/// Split on `$$$$`; the first line names the molecule, the fourth holds the
/// atom count. Records without a counts line have one atom.
fn parse_records(text: &str) -> Vec<(String, usize)> {
    text.split("$$$$")
        .filter(|record| !record.trim().is_empty())
        .enumerate()
        .map(|(index, record)| {
            let lines: Vec<&str> = record.trim_start_matches('\n').lines().collect();
            let name = lines
                .first()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("molecule_{}", index + 1));
            let atoms = lines
                .get(3)
                .and_then(|l| l.split_whitespace().next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(1);
            (name, atoms)
        })
        .collect()
}

impl ChargeEngine for ScriptedEngine {
    fn available_methods(&self) -> Result<Vec<String>, EngineError> {
        Ok(vec!["eem".into(), "qeq".into(), "sqe".into()])
    }

    fn available_parameters(&self, method: &str) -> Result<Vec<String>, EngineError> {
        match method {
            "eem" | "sqe" => Ok(Vec::new()),
            "qeq" => Ok(vec!["default".into(), "alternative".into()]),
            other => Err(EngineError::new(format!("unknown method {}", other))),
        }
    }

    fn load_molecules(&self, path: &Path, _options: &ReadOptions) -> Result<Box<dyn MoleculeSet>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::new(format!("cannot read {}: {}", path.display(), e)))?;
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(EngineError::new(format!("unreadable molecule file ({})", marker)));
            }
        }
        let molecules = parse_records(&text);
        if molecules.is_empty() {
            return Err(EngineError::new("no molecules in file"));
        }
        Ok(Box::new(ScriptedMolecules { molecules, text }))
    }

    fn suitable_methods(&self, molecules: &dyn MoleculeSet) -> Result<Vec<MethodSuitability>, EngineError> {
        self.suitability_checks.fetch_add(1, Ordering::SeqCst);
        let molecules = self.scripted(molecules)?;
        Ok((self.rule)(&molecules.text))
    }

    fn calculate_charges(&self, molecules: &dyn MoleculeSet, config: &CalculationConfig) -> Result<Charges, EngineError> {
        self.calculations.fetch_add(1, Ordering::SeqCst);
        let molecules = self.scripted(molecules)?;
        if !self.available_methods()?.contains(&config.method) {
            return Err(EngineError::new(format!("unknown method {}", config.method)));
        }
        if let Some(marker) = &self.panic_marker {
            if molecules.text.contains(marker.as_str()) {
                panic!("scripted engine crash");
            }
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let scale = config.method.len() as f64 + config.parameters.as_ref().map_or(0.0, |p| p.len() as f64);
        Ok(molecules
            .molecules
            .iter()
            .map(|(name, atoms)| {
                let values = (0..*atoms)
                    .map(|i| {
                        let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
                        sign * scale * 0.01 * (i / 2 + 1) as f64
                    })
                    .collect();
                (name.clone(), values)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records() {
        let text = "benzene\n  x\n\n  6  6  0\nM  END\n$$$$\nwater\n  y\n\n  3  2  0\nM  END\n$$$$\n";
        assert_eq!(
            parse_records(text),
            vec![("benzene".to_string(), 6), ("water".to_string(), 3)]
        );
        assert_eq!(parse_records("plain\n"), vec![("plain".to_string(), 1)]);
        assert!(parse_records("\n$$$$\n").is_empty());
    }

    #[test]
    fn test_charges_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.sdf");
        std::fs::write(&path, "mol\n\n\n  4  3\n$$$$\n").unwrap();

        let engine = ScriptedEngine::new();
        let molecules = engine.load_molecules(&path, &ReadOptions::default()).unwrap();
        let config = CalculationConfig::parameterless("eem");
        let a = engine.calculate_charges(&*molecules, &config).unwrap();
        let b = engine.calculate_charges(&*molecules, &config).unwrap();

        assert_eq!(a, b);
        assert_eq!(a["mol"].len(), 4);
        assert_eq!(engine.calculation_calls(), 2);
    }

    #[test]
    fn test_unknown_method_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.sdf");
        std::fs::write(&path, "mol\n").unwrap();

        let engine = ScriptedEngine::new();
        let molecules = engine.load_molecules(&path, &ReadOptions::default()).unwrap();
        assert!(engine
            .calculate_charges(&*molecules, &CalculationConfig::parameterless("nope"))
            .is_err());
        assert!(engine.available_parameters("nope").is_err());
    }
}
