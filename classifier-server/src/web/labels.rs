use std::{collections::BTreeMap, fs::File, io::Read, path::Path};

use anyhow::Context as _;
use serde::Deserialize;
use tracing::warn;

/// Human-readable names of the model's classes, read from a CSV file with an
/// `Index,Folder Name` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: BTreeMap<usize, String>,
}

#[derive(Deserialize)]
struct LabelRow {
    #[serde(rename = "Index")]
    index: usize,
    #[serde(rename = "Folder Name")]
    name: String,
}

impl LabelMap {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading labels from {}", path.display()))
    }

    pub fn from_reader(reader: impl Read) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut names = BTreeMap::new();
        for (i, row) in reader.deserialize::<LabelRow>().enumerate() {
            let row = row.with_context(|| format!("parsing label row #{}", i + 1))?;
            if let Some(previous) = names.insert(row.index, row.name) {
                warn!("class {} is listed twice, dropping `{previous}`", row.index);
            }
        }
        Ok(Self { names })
    }

    pub fn name(&self, class: usize) -> Option<&str> {
        self.names.get(&class).map(String::as_str)
    }

    /// The name of `class`, or a placeholder naming the index.
    pub fn label(&self, class: usize) -> String {
        match self.name(class) {
            Some(name) => name.to_owned(),
            None => format!("Unknown artist (class {class})"),
        }
    }

    /// All known labels, by class index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(|(class, name)| (*class, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(usize, String)> for LabelMap {
    fn from_iter<T: IntoIterator<Item = (usize, String)>>(iter: T) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
