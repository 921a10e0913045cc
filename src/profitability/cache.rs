//! JSON cache of the last known paying rates.
//!
//! The file is a flat object mapping algorithm ids to rates:
//! `{"20": 0.00198938141, "40": 4.317857648e-06}`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{AlgorithmId, ProfitabilityError};

/// Read the cache. A missing file is `Ok(None)`.
pub fn read_cache(path: &Path) -> Result<Option<BTreeMap<AlgorithmId, f64>>, ProfitabilityError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let rates: Option<BTreeMap<AlgorithmId, f64>> = serde_json::from_str(&content)?;
    Ok(rates)
}

pub fn write_cache(path: &Path, rates: &HashMap<AlgorithmId, f64>) -> Result<(), ProfitabilityError> {
    let ordered: BTreeMap<&AlgorithmId, &f64> = rates.iter().collect();
    let json = serde_json::to_string_pretty(&ordered)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_cache_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_cache(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn keys_are_numeric_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("internals").join("cached_profitability.json");
        let rates = HashMap::from([(AlgorithmId(20), 0.5), (AlgorithmId(8), 1.25)]);
        write_cache(&path, &rates).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["20"], 0.5);

        let back = read_cache(&path).unwrap().unwrap();
        assert_eq!(back.get(&AlgorithmId(8)), Some(&1.25));
    }
}
