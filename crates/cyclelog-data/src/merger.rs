//! Union of per-channel tables under the canonical schema.

use std::sync::Arc;

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::{
    AuxColumn, CellValue, ChannelTable, ColumnKind, EquipmentType, MergedDataset, MergedRow,
};
use tracing::debug;

/// An auxiliary column of the merged table while it is being built.
struct UnionColumn {
    name: String,
    /// Declared kind of the first table that had the column.
    declared: ColumnKind,
    /// Kind and family of every table that holds values, in table order.
    observed: Vec<(ColumnKind, EquipmentType)>,
}

impl UnionColumn {
    /// Settle the column kind from every observation at once; table order
    /// never changes the outcome.
    fn resolve(&self) -> Result<ColumnKind> {
        for (i, &(left_kind, left_family)) in self.observed.iter().enumerate() {
            for &(right_kind, right_family) in &self.observed[i + 1..] {
                if left_kind.unify(right_kind).is_none()
                    && !left_family.same_family(&right_family)
                {
                    return Err(CyclerError::SchemaConflict {
                        column: self.name.clone(),
                        left: format!("{} ({left_family})", left_kind.as_str()),
                        right: format!("{} ({right_family})", right_kind.as_str()),
                    });
                }
            }
        }
        Ok(self
            .observed
            .iter()
            .map(|(kind, _)| *kind)
            .reduce(ColumnKind::widen)
            .unwrap_or(self.declared))
    }
}

/// Merge `tables` into one dataset.
///
/// Rows keep their channel grouping in input order; channels are never
/// interleaved. Auxiliary columns are the union of all tables' columns in
/// first-seen order. Integer and float columns of the same name unify to
/// float. Text meeting numbers widens to text within one equipment family
/// and is a `SchemaConflict` across families. Columns with no values in a
/// table do not take part in kind resolution.
pub fn merge(tables: Vec<ChannelTable>) -> Result<MergedDataset> {
    let mut union: Vec<UnionColumn> = Vec::new();
    let mut mappings: Vec<Vec<usize>> = Vec::with_capacity(tables.len());

    for table in &tables {
        let family = table.channel.equipment;
        let mut mapping = Vec::with_capacity(table.aux_columns.len());
        for (j, column) in table.aux_columns.iter().enumerate() {
            let has_values = table.records.iter().any(|r| r.aux.get(j).is_some_and(|c| !c.is_null()));
            let slot = match union.iter().position(|u| u.name == column.name) {
                Some(slot) => slot,
                None => {
                    union.push(UnionColumn {
                        name: column.name.clone(),
                        declared: column.kind,
                        observed: Vec::new(),
                    });
                    union.len() - 1
                }
            };
            if has_values {
                union[slot].observed.push((column.kind, family));
            }
            mapping.push(slot);
        }
        mappings.push(mapping);
    }

    let aux_columns = union
        .into_iter()
        .map(|u| {
            let kind = u.resolve()?;
            Ok(AuxColumn::new(u.name, kind))
        })
        .collect::<Result<Vec<AuxColumn>>>()?;

    let total: usize = tables.iter().map(ChannelTable::len).sum();
    let mut rows = Vec::with_capacity(total);
    for (table, mapping) in tables.into_iter().zip(mappings) {
        let channel_id: Arc<str> = Arc::from(table.channel.id.as_str());
        let equipment = table.channel.equipment;
        for record in table.records {
            let mut aux = vec![CellValue::Null; aux_columns.len()];
            for (cell, &slot) in record.aux.into_iter().zip(&mapping) {
                aux[slot] = cell.coerce(aux_columns[slot].kind);
            }
            rows.push(MergedRow {
                channel_id: Arc::clone(&channel_id),
                source_equipment: equipment,
                timestamp: record.timestamp,
                voltage: record.voltage,
                current: record.current,
                capacity: record.capacity,
                step: record.step,
                cycle: record.cycle,
                temperature: record.temperature,
                aux,
            });
        }
    }
    debug_assert_eq!(rows.len(), total);
    debug!(
        "Merged {} rows with {} auxiliary columns",
        rows.len(),
        aux_columns.len()
    );

    Ok(MergedDataset {
        battery: None,
        aux_columns,
        rows,
    })
}
