/// Bookkeeping of the comments, colors and names placed in the debugger, so they can be removed later

use std::collections::BTreeMap;

use log::info;

use crate::debugger::{Color, Debugger, DEFCOLOR};

pub const SNAPSHOT_COMMENT: &str = "Snapshot taken here";
pub const TAINTED_FUNCTION_PREFIX: &str = "T_";

#[derive(Debug, Clone, PartialEq, Eq)]
struct InstructionInfo {
    comment: String,
    snapshot_comment: String,
    color: Color,
}

impl Default for InstructionInfo {
    fn default() -> Self {
        InstructionInfo { comment: String::new(), snapshot_comment: String::new(), color: DEFCOLOR }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Annotations {
    entries: BTreeMap<u64, InstructionInfo>,
}

// "<n> hits. <text>" when the address already carries a comment
fn with_hit_count(previous: Option<String>, text: &str) -> String {
    match previous {
        None => text.to_string(),
        Some(previous) if previous.is_empty() => text.to_string(),
        Some(previous) => {
            let hits = previous
                .split(' ')
                .next()
                .and_then(|first| first.parse::<u32>().ok())
                .map(|n| n + 1)
                .unwrap_or(2);
            format!("{} hits. {}", hits, text)
        }
    }
}

impl Annotations {
    pub fn new() -> Self {
        Annotations::default()
    }

    pub fn set_comment(&mut self, debugger: &mut dyn Debugger, address: u64, text: &str) {
        let comment = with_hit_count(debugger.comment(address), text);
        // Only the first line is kept for bookkeeping
        let first_line = comment.split('\n').next().unwrap_or("").to_string();
        self.entries.entry(address).or_default().comment = first_line;
        debugger.set_comment(address, &comment);
    }

    pub fn set_snapshot_comment(&mut self, debugger: &mut dyn Debugger, address: u64) {
        self.entries.entry(address).or_default().snapshot_comment = SNAPSHOT_COMMENT.to_string();
        debugger.set_comment(address, SNAPSHOT_COMMENT);
    }

    pub fn set_color(&mut self, debugger: &mut dyn Debugger, address: u64, color: Color) {
        self.entries.entry(address).or_default().color = color;
        debugger.set_item_color(address, color);
    }

    pub fn clear_comment(&mut self, debugger: &mut dyn Debugger, address: u64) {
        if let Some(info) = self.entries.get_mut(&address) {
            info.comment.clear();
        }
        debugger.set_comment(address, "");
    }

    pub fn comment(&self, address: u64) -> Option<&str> {
        self.entries.get(&address).map(|info| info.comment.as_str()).filter(|c| !c.is_empty())
    }

    pub fn color(&self, address: u64) -> Option<Color> {
        self.entries.get(&address).map(|info| info.color).filter(|c| *c != DEFCOLOR)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every comment and color placed so far. The snapshot comment is put back
    /// when a snapshot still exists.
    pub fn delete_all(&mut self, debugger: &mut dyn Debugger, snapshot_exists: bool) {
        let mut comments = 0;
        let mut colors = 0;
        let mut snapshot_address = None;
        for (address, info) in &self.entries {
            if !info.comment.is_empty() {
                debugger.set_comment(*address, "");
                comments += 1;
            }
            if !info.snapshot_comment.is_empty() {
                if snapshot_exists {
                    snapshot_address = Some(*address);
                }
                debugger.set_comment(*address, "");
            }
            if info.color != DEFCOLOR {
                debugger.del_item_color(*address);
                colors += 1;
            }
        }
        self.entries.clear();
        info!("Deleted {} comments and {} colored addresses", comments, colors);

        if let Some(address) = snapshot_address {
            self.set_snapshot_comment(debugger, address);
        }
    }
}

/// Prefixes the function containing `address` with `T_NNN_` unless it already carries the prefix.
/// Returns true when a rename happened.
pub fn rename_tainted_function(debugger: &mut dyn Debugger, address: u64, index: &mut u32) -> bool {
    let start = match debugger.function_start(address) {
        Some(start) => start,
        None => return false,
    };
    let name = match debugger.function_name(start) {
        Some(name) => name,
        None => return false,
    };
    if name.starts_with(TAINTED_FUNCTION_PREFIX) {
        return false;
    }
    let new_name = format!("{}{:03}_{}", TAINTED_FUNCTION_PREFIX, *index, name);
    if debugger.rename_function(start, &new_name) {
        info!("Renaming function {} -> {}", name, new_name);
        *index += 1;
        true
    } else {
        false
    }
}
