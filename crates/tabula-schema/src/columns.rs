//! Structure-defining column configuration
//!
//! Different projects configure different rate and enumeration columns on
//! their structure tables. The table-type handler owns that configuration;
//! this crate consumes it through `StructureColumnProvider` so the
//! generated functions can be tailored to the columns that actually exist.

/// Database column names that define a structure table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureColumns {
    pub variable_name: String,
    pub data_type: String,
    pub array_size: String,
    pub bit_length: String,
    /// Row-order column used by the sorted-by-index function variants.
    pub row_index: String,
    /// Rate column names, one per configured data stream.
    pub rates: Vec<String>,
    /// Enumeration column names across structure table types.
    pub enumerations: Vec<String>,
}

impl Default for StructureColumns {
    fn default() -> Self {
        Self {
            variable_name: "variable_name".into(),
            data_type: "data_type".into(),
            array_size: "array_size".into(),
            bit_length: "bit_length".into(),
            row_index: "row_index".into(),
            rates: vec!["rate".into()],
            enumerations: vec!["enumeration".into()],
        }
    }
}

impl StructureColumns {
    /// Number of matching columns a table must have to count as a
    /// structure: the four defining columns plus a rate and an enumeration
    /// column when any are configured.
    pub fn required_column_count(&self) -> usize {
        let mut count = 4;
        if !self.rates.is_empty() {
            count += 1;
        }
        if !self.enumerations.is_empty() {
            count += 1;
        }
        count
    }

    /// The `column_name = '...' OR ...` comparison used to detect
    /// structure tables, grouping each rate/enumeration pair the way the
    /// table types define them.
    pub fn compare_columns(&self) -> String {
        let base = format!(
            "column_name = '{}' OR column_name = '{}' OR column_name = '{}' OR column_name = '{}'",
            self.variable_name, self.data_type, self.array_size, self.bit_length,
        );

        let mut pairs: Vec<String> = Vec::new();
        let pair_count = self.rates.len().max(self.enumerations.len());
        for index in 0..pair_count {
            let mut pair = String::new();
            if let Some(rate) = self.rates.get(index) {
                pair.push_str(&format!("column_name = '{rate}'"));
            }
            if let Some(enumeration) = self.enumerations.get(index) {
                if !pair.is_empty() {
                    pair.push_str(" OR ");
                }
                pair.push_str(&format!("column_name = '{enumeration}'"));
            }
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }

        if pairs.is_empty() {
            return format!("({base})");
        }

        pairs
            .into_iter()
            .map(|pair| format!("({base} OR {pair})"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Capability supplying the current structure column configuration.
///
/// Implemented by the table-type handler in the host application; the
/// default implementation serves projects with no custom table types.
pub trait StructureColumnProvider: Send + Sync {
    fn structure_columns(&self) -> StructureColumns;
}

/// Provider returning the default column set.
#[derive(Debug, Default)]
pub struct DefaultColumns;

impl StructureColumnProvider for DefaultColumns {
    fn structure_columns(&self) -> StructureColumns {
        StructureColumns::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_count_tracks_configured_columns() {
        let mut columns = StructureColumns::default();
        assert_eq!(columns.required_column_count(), 6);

        columns.rates.clear();
        columns.enumerations.clear();
        assert_eq!(columns.required_column_count(), 4);
    }

    #[test]
    fn test_compare_columns_groups_rate_enum_pairs() {
        let columns = StructureColumns {
            rates: vec!["rate_hk".into(), "rate_sci".into()],
            enumerations: vec!["enumeration".into()],
            ..Default::default()
        };
        let compare = columns.compare_columns();
        assert!(compare.contains("column_name = 'rate_hk' OR column_name = 'enumeration'"));
        assert!(compare.contains("column_name = 'rate_sci'"));
        assert!(compare.contains("column_name = 'variable_name'"));
    }

    #[test]
    fn test_compare_columns_without_rate_or_enum() {
        let columns = StructureColumns {
            rates: Vec::new(),
            enumerations: Vec::new(),
            ..Default::default()
        };
        let compare = columns.compare_columns();
        assert!(compare.starts_with("(column_name = 'variable_name'"));
        assert!(!compare.contains(" OR ("));
    }
}
