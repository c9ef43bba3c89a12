//! External Engine Adapter
//!
//! Implements the `ChargeEngine` port by running a ChargeFW2-compatible
//! command line executable. One process per call:
//!
//! ```text
//! <bin> --mode available-methods
//! <bin> --mode available-parameters --method <m>
//! <bin> --mode info             --input-file <f> [read flags]
//! <bin> --mode suitable-methods --input-file <f> [read flags]
//! <bin> --mode charges          --input-file <f> --method <m> [--par-file <p>]
//!                               --chg-out-dir <dir> [read flags]
//! ```
//!
//! Read flags are `--read-hetatm`, `--ignore-water` and `--permissive-types`.
//! `suitable-methods` prints one method per line followed by its parameter
//! sets; `charges` writes `<dir>/<file name>.txt` with a molecule id line
//! followed by a line of space separated charges for every molecule.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;
use uuid::Uuid;

use crate::domain::model::{CalculationConfig, Charges, ReadOptions};
use crate::domain::ports::{ChargeEngine, MethodSuitability, MoleculeSet};
use crate::error::EngineError;

type EngineResult<T> = std::result::Result<T, EngineError>;

/// Molecules known only by the file they came from.
#[derive(Debug, Clone)]
pub struct FileMolecules {
    path: PathBuf,
    options: ReadOptions,
    count: usize,
}

impl MoleculeSet for FileMolecules {
    fn molecule_count(&self) -> usize {
        self.count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    binary: PathBuf,
    scratch_dir: PathBuf,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory for per-call charge output.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn run(&self, args: &[String]) -> EngineResult<String> {
        debug!(binary = %self.binary.display(), args = ?args, "Running charge engine");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| EngineError::new(format!("cannot start {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            return Err(EngineError::new(if message.is_empty() {
                format!("engine exited with {}", output.status)
            } else {
                message.to_string()
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn file_molecules<'a>(&self, molecules: &'a dyn MoleculeSet) -> EngineResult<&'a FileMolecules> {
        molecules
            .as_any()
            .downcast_ref::<FileMolecules>()
            .ok_or_else(|| EngineError::new("molecule set was not loaded by this engine"))
    }
}

fn input_args(path: &Path, options: &ReadOptions) -> Vec<String> {
    let mut args = vec!["--input-file".to_string(), path.display().to_string()];
    if options.read_hetatm {
        args.push("--read-hetatm".into());
    }
    if options.ignore_water {
        args.push("--ignore-water".into());
    }
    if options.permissive_types {
        args.push("--permissive-types".into());
    }
    args
}

fn mode(name: &str) -> Vec<String> {
    vec!["--mode".to_string(), name.to_string()]
}

fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// `Number of molecules: N` from `--mode info`.
fn parse_molecule_count(output: &str) -> EngineResult<usize> {
    output
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("number of molecules") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .ok_or_else(|| EngineError::new("engine did not report a molecule count"))
}

fn parse_suitable(output: &str) -> Vec<MethodSuitability> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let method = parts.next()?;
            Some(MethodSuitability::with_parameters(method, parts))
        })
        .collect()
}

/// Alternating molecule id and charges lines. Ids must be unique within a file.
fn parse_charges(text: &str) -> EngineResult<Charges> {
    let mut charges = Charges::new();
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    while let Some(name) = lines.next() {
        let values = lines
            .next()
            .ok_or_else(|| EngineError::new(format!("missing charges for molecule {}", name)))?;
        let parsed = values
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::new(format!("invalid charge for molecule {}: {}", name, e)))?;
        if charges.insert(name.to_string(), parsed).is_some() {
            return Err(EngineError::new(format!("molecule {} appears more than once", name)));
        }
    }
    Ok(charges)
}

impl ChargeEngine for ProcessEngine {
    fn available_methods(&self) -> EngineResult<Vec<String>> {
        Ok(non_empty_lines(&self.run(&mode("available-methods"))?))
    }

    fn available_parameters(&self, method: &str) -> EngineResult<Vec<String>> {
        let mut args = mode("available-parameters");
        args.extend(["--method".to_string(), method.to_string()]);
        Ok(non_empty_lines(&self.run(&args)?))
    }

    fn load_molecules(&self, path: &Path, options: &ReadOptions) -> EngineResult<Box<dyn MoleculeSet>> {
        let mut args = mode("info");
        args.extend(input_args(path, options));
        let count = parse_molecule_count(&self.run(&args)?)?;
        Ok(Box::new(FileMolecules {
            path: path.to_path_buf(),
            options: *options,
            count,
        }))
    }

    fn suitable_methods(&self, molecules: &dyn MoleculeSet) -> EngineResult<Vec<MethodSuitability>> {
        let molecules = self.file_molecules(molecules)?;
        let mut args = mode("suitable-methods");
        args.extend(input_args(&molecules.path, &molecules.options));
        Ok(parse_suitable(&self.run(&args)?))
    }

    fn calculate_charges(&self, molecules: &dyn MoleculeSet, config: &CalculationConfig) -> EngineResult<Charges> {
        let molecules = self.file_molecules(molecules)?;
        let out_dir = self.scratch_dir.join(format!("chargeflow-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&out_dir)
            .map_err(|e| EngineError::new(format!("cannot create output directory: {}", e)))?;

        let mut args = mode("charges");
        args.extend(input_args(&molecules.path, &molecules.options));
        args.extend(["--method".to_string(), config.method.clone()]);
        if let Some(parameters) = &config.parameters {
            args.extend(["--par-file".to_string(), parameters.clone()]);
        }
        args.extend(["--chg-out-dir".to_string(), out_dir.display().to_string()]);

        let result = self.run(&args).and_then(|_| {
            let file_name = molecules
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let output = out_dir.join(format!("{}.txt", file_name));
            let text = std::fs::read_to_string(&output)
                .map_err(|e| EngineError::new(format!("engine produced no charges: {}", e)))?;
            parse_charges(&text)
        });
        let _ = std::fs::remove_dir_all(&out_dir);
        result
    }
}
