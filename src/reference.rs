use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// Resolves a reference-material name to certified element concentrations.
///
/// Lookups are exact after trimming surrounding whitespace. Fuzzy or
/// substring matching is deliberately not offered: a mislabelled sample
/// should fail to resolve rather than silently pick up another material's
/// certificate.
pub trait ReferenceProvider {
    fn certified(&self, material: &str, element: &str) -> Option<f64>;
}

/// In-memory certified-value table, loadable from a CSV certificate export
/// with `material,element,concentration` columns.
#[derive(Clone, Debug, Default)]
pub struct CertifiedTable {
    values: HashMap<String, HashMap<String, f64>>,
}

#[derive(Deserialize)]
struct Row(String, String, f64);

impl CertifiedTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: &str, element: &str, concentration: f64) {
        self.values
            .entry(material.trim().to_owned())
            .or_default()
            .insert(element.trim().to_owned(), concentration);
    }

    /// Load a table from a CSV certificate file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a row does not match
    /// the expected `material,element,concentration` shape.
    pub fn from_csv_path(filepath: &Path) -> Result<Self> {
        let file = fs::read(filepath)?;
        Self::from_csv_reader(&file[..])
    }

    fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let mut table = Self::new();
        for result in rdr.deserialize() {
            let record: Row = result?;
            table.insert(&record.0, &record.1, record.2);
        }
        Ok(table)
    }
}

impl ReferenceProvider for CertifiedTable {
    fn certified(&self, material: &str, element: &str) -> Option<f64> {
        self.values
            .get(material.trim())
            .and_then(|elements| elements.get(element.trim()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{CertifiedTable, ReferenceProvider};

    #[test]
    fn lookup_is_exact_after_trimming() {
        let mut table = CertifiedTable::new();
        table.insert("OREAS 25a", "Cu", 100.0);

        assert_eq!(table.certified("  OREAS 25a ", "Cu"), Some(100.0));
        assert_eq!(table.certified("OREAS 25", "Cu"), None);
        assert_eq!(table.certified("OREAS 25a", "Fe"), None);
    }

    #[test]
    fn csv_certificates_parse() {
        let raw = "material,element,concentration\nOREAS 25a,Cu,100.0\nOREAS 25a,Fe,4.2\n";
        let table = CertifiedTable::from_csv_reader(raw.as_bytes()).unwrap();
        assert_eq!(table.certified("OREAS 25a", "Fe"), Some(4.2));
    }
}
