use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A product which makes use of Lithium for licensing purposes.
///
/// The descriptor only provides naming material for certificate subjects;
/// it carries no authority of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub organization: String,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Product {
            id: id.into(),
            name: name.into(),
            organization: organization.into(),
        }
    }

    /// Persist this descriptor as `{id}.json` under the license directory.
    pub fn save(&self, directory: &Path) -> Result<()> {
        fs::create_dir_all(directory)?;
        let data = serde_json::to_vec(self)?;
        fs::write(directory.join(format!("{}.json", self.id)), data)?;
        Ok(())
    }

    /// Load a descriptor by product id. Absence is not an error.
    pub fn load(directory: &Path, id: &str) -> Result<Option<Product>> {
        let data = match fs::read(directory.join(format!("{}.json", id))) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// List every descriptor stored under the license directory.
    pub fn list(directory: &Path) -> Result<Vec<Product>> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut products = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                products.push(serde_json::from_slice(&fs::read(&path)?)?);
            }
        }

        products.sort_by(|a: &Product, b: &Product| a.id.cmp(&b.id));
        Ok(products)
    }
}
