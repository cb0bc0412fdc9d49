//! Metric documentation manifest: a two-column `origin,name` list.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;

use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricId {
    pub origin: String,
    pub name: String,
}

impl MetricId {
    pub fn new(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeSet<MetricId>,
}

impl Manifest {
    pub async fn load(path: &Path) -> AuditResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuditError::manifest_unreadable(path, e.to_string()))?;
        Self::parse(&text).map_err(|message| AuditError::manifest_unreadable(path, message))
    }

    /// Parse the CSV body. Blank lines are skipped; any other row needs at
    /// least two fields. Extra columns are ignored.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut entries = BTreeSet::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields = split_fields(line).map_err(|e| format!("line {}: {e}", n + 1))?;
            match (fields.first(), fields.get(1)) {
                (Some(origin), Some(name)) if !origin.is_empty() && !name.is_empty() => {
                    entries.insert(MetricId::new(origin.as_str(), name.as_str()));
                }
                _ => return Err(format!("line {}: expected origin,name", n + 1)),
            }
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, id: &MetricId) -> bool {
        self.entries.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricId> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split one CSV row. Quoted fields may contain commas, and `""` inside
/// quotes is a literal quote. Whitespace around a field is dropped.
fn split_fields(line: &str) -> Result<Vec<String>, &'static str> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quote");
    }
    fields.push(field.trim().to_string());
    Ok(fields)
}
