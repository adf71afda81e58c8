//! Equipment detection from the directory layout of a test folder.

use std::path::Path;
use std::sync::OnceLock;

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::EquipmentType;
use regex::Regex;
use tracing::debug;

use crate::reader::{is_numeric_name, list_children, DirChild};

/// Name of the Toyo per-channel capacity summary.
pub const CAPACITY_LOG: &str = "CAPACITY.LOG";
/// Name of the PNE per-channel data directory.
pub const RESTORE_DIR: &str = "Restore";

/// PNE channel folders, e.g. `M01Ch003[003]`.
pub(crate) fn pne_channel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^M\d+Ch\d+").expect("regex is valid"))
}

/// Detect which cycler wrote the test folder at `root`.
///
/// Signatures are evaluated against every immediate child. A root that
/// matches both families, or whose Toyo channels disagree on layout, is
/// ambiguous; a root that matches neither is unrecognized.
pub fn classify(root: &Path) -> Result<EquipmentType> {
    let children = list_children(root)?;

    let mut pne = false;
    let mut toyo1 = false;
    let mut toyo2 = false;
    for child in children.iter().filter(|c| c.is_dir) {
        if is_pne_channel(child)? {
            pne = true;
        } else if let Some(equipment) = toyo_channel_layout(child)? {
            match equipment {
                EquipmentType::Toyo2 => toyo2 = true,
                _ => toyo1 = true,
            }
        }
    }

    let mut candidates = Vec::new();
    if pne {
        candidates.push(EquipmentType::Pne);
    }
    if toyo1 {
        candidates.push(EquipmentType::Toyo1);
    }
    if toyo2 {
        candidates.push(EquipmentType::Toyo2);
    }
    debug!(root = %root.display(), ?candidates, "equipment signatures");

    match candidates.as_slice() {
        [] => Err(CyclerError::UnrecognizedEquipment {
            path: root.to_path_buf(),
        }),
        [only] => Ok(*only),
        _ => Err(CyclerError::AmbiguousEquipment {
            path: root.to_path_buf(),
            candidates: candidates.iter().map(|e| e.as_str().to_string()).collect(),
        }),
    }
}

/// `M<n>Ch<n>` folder whose `Restore` directory holds a SaveData fragment.
fn is_pne_channel(child: &DirChild) -> Result<bool> {
    if !pne_channel_pattern().is_match(&child.name) {
        return Ok(false);
    }
    let restore = child.path.join(RESTORE_DIR);
    if !restore.is_dir() {
        return Ok(false);
    }
    Ok(list_children(&restore)?
        .iter()
        .any(|f| !f.is_dir && f.name.contains("SaveData") && f.name.ends_with(".csv")))
}

/// Toyo layout of a numeric folder holding `CAPACITY.LOG` and numeric raw
/// files; `None` when the folder is not a Toyo channel.
pub(crate) fn toyo_channel_layout(child: &DirChild) -> Result<Option<EquipmentType>> {
    if !is_numeric_name(&child.name) {
        return Ok(None);
    }
    let files = list_children(&child.path)?;
    let has_log = files.iter().any(|f| !f.is_dir && f.name == CAPACITY_LOG);
    let has_raw = files.iter().any(|f| !f.is_dir && is_numeric_name(&f.name));
    if !(has_log && has_raw) {
        return Ok(None);
    }
    let has_aux_log = files.iter().any(|f| !f.is_dir && is_aux_log(&f.name));
    Ok(Some(if has_aux_log {
        EquipmentType::Toyo2
    } else {
        EquipmentType::Toyo1
    }))
}

/// Any `.LOG` file other than the capacity summary.
pub(crate) fn is_aux_log(name: &str) -> bool {
    name != CAPACITY_LOG
        && Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("log"))
}
