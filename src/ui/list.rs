//! List view (§4.6): a derived category grouping over the instance list
//! (§3 "Category grouping ... rebuilt from the authoritative list rather
//! than stored"), a visible-items view applying the hide-paused filter and
//! search, a scroll window, and per-field persistence to the Persisted
//! Store. Instances are referenced by title, a stable identity (§9); the
//! list never hands out back-pointers.

use std::collections::BTreeMap;

use crate::state::{Instance, Status, UiState};

const UNCATEGORIZED: &str = "Uncategorized";

/// One category's worth of instance indices, in list order.
#[derive(Debug, Clone, Default)]
pub struct Category {
    pub label: String,
    pub indices: Vec<usize>,
}

/// Rebuild the category grouping from the authoritative instance list.
/// Never stored; always derived (§3).
pub fn group_by_category(instances: &[Instance]) -> Vec<Category> {
    let mut by_label: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, instance) in instances.iter().enumerate() {
        let label = instance
            .category
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        by_label.entry(label).or_default().push(idx);
    }
    by_label
        .into_iter()
        .map(|(label, indices)| Category { label, indices })
        .collect()
}

pub struct ListView {
    pub hide_paused: bool,
    pub search_mode: bool,
    pub search_query: String,
    pub selected_idx: i64,
    pub category_expanded: std::collections::HashMap<String, bool>,
    pub scroll_offset: usize,
    pub viewport_height: usize,
}

impl ListView {
    pub fn from_ui_state(ui: UiState) -> Self {
        Self {
            hide_paused: ui.hide_paused,
            search_mode: ui.search_mode,
            search_query: ui.search_query,
            selected_idx: ui.selected_idx,
            category_expanded: ui.category_expanded,
            scroll_offset: 0,
            viewport_height: 20,
        }
    }

    pub fn to_ui_state(&self) -> UiState {
        UiState {
            hide_paused: self.hide_paused,
            category_expanded: self.category_expanded.clone(),
            search_mode: self.search_mode,
            search_query: self.search_query.clone(),
            selected_idx: self.selected_idx,
        }
    }

    /// Visible-items view: applies the hide-paused filter and a
    /// case-insensitive substring search on title.
    pub fn visible_indices(&self, instances: &[Instance]) -> Vec<usize> {
        let query = self.search_query.to_lowercase();
        instances
            .iter()
            .enumerate()
            .filter(|(_, i)| !(self.hide_paused && matches!(i.status, Status::Paused)))
            .filter(|(_, i)| query.is_empty() || i.title.to_lowercase().contains(&query))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Recompute the scroll window so `selected_idx` stays within view.
    pub fn recompute_scroll(&mut self, visible_count: usize) {
        if visible_count == 0 {
            self.scroll_offset = 0;
            return;
        }
        let selected = self.selected_idx.clamp(0, visible_count as i64 - 1) as usize;
        if selected < self.scroll_offset {
            self.scroll_offset = selected;
        } else if selected >= self.scroll_offset + self.viewport_height {
            self.scroll_offset = selected + 1 - self.viewport_height;
        }
    }

    pub fn move_selection(&mut self, delta: i64, visible_count: usize) {
        if visible_count == 0 {
            self.selected_idx = 0;
            return;
        }
        self.selected_idx = (self.selected_idx + delta).clamp(0, visible_count as i64 - 1);
    }

    /// §9 Open Question 3, resolved: clearing filters resets the search
    /// query and exits search mode, but leaves `hide_paused` untouched.
    pub fn clear_filters(&mut self) {
        self.search_query.clear();
        self.search_mode = false;
    }

    pub fn toggle_category(&mut self, label: &str) {
        let expanded = self.category_expanded.entry(label.to_string()).or_insert(true);
        *expanded = !*expanded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_instance(title: &str, category: Option<&str>, status: Status) -> Instance {
        use crate::state::DiffStats;
        Instance {
            title: title.to_string(),
            path: PathBuf::new(),
            working_dir: PathBuf::new(),
            branch: format!("workloom/{title}"),
            status,
            height: 24,
            width: 80,
            created_at: 0,
            updated_at: 0,
            auto_yes: false,
            prompt: None,
            program: "claude".into(),
            existing_worktree: None,
            category: category.map(String::from),
            tags: Vec::new(),
            worktree: None,
            diff_stats: DiffStats::default(),
        }
    }

    #[test]
    fn empty_category_groups_under_uncategorized() {
        let instances = vec![make_instance("t1", None, Status::Ready)];
        let groups = group_by_category(&instances);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label, "Uncategorized");
    }

    #[test]
    fn hide_paused_filters_out_paused_instances() {
        let instances = vec![
            make_instance("a", None, Status::Ready),
            make_instance("b", None, Status::Paused),
        ];
        let list = ListView {
            hide_paused: true,
            search_mode: false,
            search_query: String::new(),
            selected_idx: 0,
            category_expanded: Default::default(),
            scroll_offset: 0,
            viewport_height: 10,
        };
        assert_eq!(list.visible_indices(&instances), vec![0]);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let instances = vec![make_instance("Fix-Auth", None, Status::Ready)];
        let mut list = ListView {
            hide_paused: false,
            search_mode: true,
            search_query: "auth".to_string(),
            selected_idx: 0,
            category_expanded: Default::default(),
            scroll_offset: 0,
            viewport_height: 10,
        };
        assert_eq!(list.visible_indices(&instances), vec![0]);
        list.search_query = "nomatch".to_string();
        assert!(list.visible_indices(&instances).is_empty());
    }

    #[test]
    fn clear_filters_resets_search_but_not_hide_paused() {
        let mut list = ListView {
            hide_paused: true,
            search_mode: true,
            search_query: "foo".to_string(),
            selected_idx: 0,
            category_expanded: Default::default(),
            scroll_offset: 0,
            viewport_height: 10,
        };
        list.clear_filters();
        assert!(list.search_query.is_empty());
        assert!(!list.search_mode);
        assert!(list.hide_paused);
    }

    #[test]
    fn ui_state_fields_commute() {
        let mut list = ListView::from_ui_state(UiState::default());
        list.hide_paused = true;
        let before = list.category_expanded.clone();
        list.hide_paused = false;
        assert_eq!(list.category_expanded, before);
    }
}
