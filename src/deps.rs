use std::collections::HashSet;

use crate::config::ContractSpec;
use crate::error::{Error, Result};

/// Order `specs` so every contract comes after its dependencies.
///
/// Each pass walks the input in order and places every spec whose dependencies are already
/// placed, so independent specs keep their input order. A pass that places nothing means the
/// remaining specs sit on a cycle or name a dependency that does not exist; they are reported in
/// input order.
pub fn deployment_order(specs: &[ContractSpec]) -> Result<Vec<&ContractSpec>> {
    let mut names = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(Error::DuplicateContract(spec.name.clone()));
        }
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(specs.len());
    let mut ordered = Vec::with_capacity(specs.len());
    while ordered.len() < specs.len() {
        let mut progress = false;
        for spec in specs {
            if placed.contains(spec.name.as_str()) {
                continue;
            }
            if spec
                .dependencies
                .iter()
                .all(|dep| placed.contains(dep.as_str()))
            {
                placed.insert(spec.name.as_str());
                ordered.push(spec);
                progress = true;
            }
        }
        if !progress {
            let blocked = specs
                .iter()
                .filter(|s| !placed.contains(s.name.as_str()))
                .map(|s| s.name.clone())
                .collect();
            return Err(Error::CyclicOrMissingDependency(blocked));
        }
    }
    Ok(ordered)
}
