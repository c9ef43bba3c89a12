//! Charges text files written next to a computation.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::domain::model::{CalculationConfig, CalculationResult, Charges};
use crate::error::Result;

/// `<file>.<method>[.<parameters>].chg`
pub fn charges_file_name(file: &str, config: &CalculationConfig) -> String {
    let clean = |s: &str| s.replace(['/', '\\'], "_");
    match &config.parameters {
        Some(parameters) => format!("{}.{}.{}.chg", file, clean(&config.method), clean(parameters)),
        None => format!("{}.{}.chg", file, clean(&config.method)),
    }
}

/// Molecule id line, then its charges on one line.
pub fn render_charges(charges: &Charges) -> String {
    let mut out = String::new();
    for (molecule, values) in charges {
        let line: Vec<String> = values.iter().map(|v| format!("{:.4}", v)).collect();
        let _ = writeln!(out, "{}", molecule);
        let _ = writeln!(out, "{}", line.join(" "));
    }
    out
}

/// Write one file per successful part. Returns the written paths.
pub fn write_results(dir: &Path, results: &[CalculationResult]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for result in results {
        for part in &result.calculations {
            if let Some(charges) = part.charges() {
                let path = dir.join(charges_file_name(&part.file, &result.config));
                std::fs::write(&path, render_charges(charges))?;
                written.push(path);
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CalculationPart, ContentHash};
    use crate::error::EngineError;

    #[test]
    fn test_file_names() {
        assert_eq!(
            charges_file_name("a.sdf", &CalculationConfig::parameterless("eem")),
            "a.sdf.eem.chg"
        );
        assert_eq!(
            charges_file_name("a.sdf", &CalculationConfig::with_parameters("qeq", "x/y")),
            "a.sdf.qeq.x_y.chg"
        );
    }

    #[test]
    fn test_render() {
        let charges = Charges::from([("water".to_string(), vec![-0.8, 0.4, 0.4])]);
        assert_eq!(render_charges(&charges), "water\n-0.8000 0.4000 0.4000\n");
    }

    #[test]
    fn test_failed_parts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let hash = ContentHash::parse(&"2".repeat(64)).unwrap();
        let result = CalculationResult {
            config: CalculationConfig::parameterless("eem"),
            calculations: vec![
                CalculationPart::success("ok.sdf", hash.clone(), Charges::new()),
                CalculationPart::failure("bad.sdf", hash, EngineError::new("x")),
            ],
        };

        let written = write_results(dir.path(), &[result]).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("ok.sdf.eem.chg"));
    }
}
